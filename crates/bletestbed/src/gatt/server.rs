//! GATT Server (peripheral role)
//!
//! Exposes the echo service to any number of connected centrals, tracks each
//! peer's client configuration, answers read/write/descriptor requests and
//! pushes echo and time values to subscribed peers.
//!
//! The server is purely event-driven. Platform callbacks are posted to its
//! serial queue and handled by [`GattServer::process_events`]; peer and
//! subscription state is only ever mutated from there (or from the direct
//! handler calls a caller makes on the same thread).

use std::collections::{BTreeSet, HashMap};

use byteorder::{ByteOrder, LittleEndian};
use chrono::Local;

use super::activity::{ActivityLog, LogCallback};
use super::adapter::{AdvertiseSettings, PeripheralAdapter, ServerEvent, ServerHandle};
use super::types::{BdAddr, Characteristic, ConnectionState, GattStatus, Service};
use crate::codec::{hex_format, reverse, timestamp_bytes};
use crate::error::{GattError, GattResult};
use crate::queue::{EventQueue, EventSender};
use crate::registry::{
    echo_service, is_client_configuration_descriptor, is_echo_characteristic,
    CHARACTERISTIC_ECHO_UUID, CHARACTERISTIC_TIME_UUID, DISABLE_NOTIFICATION_VALUE,
    ENABLE_NOTIFICATION_VALUE, SERVICE_UUID,
};
use crate::uuid::Uuid;

/// GATT Server configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GattServerConfig {
    /// Settings used whenever advertising is (re)started
    pub advertise: AdvertiseSettings,
    /// Give the time characteristic read permission
    pub time_readable: bool,
}

/// Whether a stored client configuration value switches notifications on.
///
/// The enable bits must be a superset of the enable pattern; unrelated bits
/// set by the peer do not disable notification.
pub fn configuration_enables_notifications(value: &[u8]) -> bool {
    if value.len() < 2 {
        return false;
    }
    let flags = LittleEndian::read_u16(value);
    let enable = LittleEndian::read_u16(&ENABLE_NOTIFICATION_VALUE);
    flags & enable == enable
}

/// Peripheral session manager
pub struct GattServer<A: PeripheralAdapter> {
    adapter: A,
    config: GattServerConfig,
    /// Open server, `None` while stopped
    server: Option<ServerHandle>,
    service: Service,
    /// Currently connected peers
    peers: BTreeSet<BdAddr>,
    /// Last client configuration value written by each peer
    client_configurations: HashMap<BdAddr, Vec<u8>>,
    events: EventQueue<ServerEvent>,
    log: ActivityLog,
}

impl<A: PeripheralAdapter> std::fmt::Debug for GattServer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattServer")
            .field("server", &self.server)
            .field("config", &self.config)
            .field("peers", &self.peers)
            .field("client_configurations", &self.client_configurations)
            .field("log", &self.log)
            .finish()
    }
}

impl<A: PeripheralAdapter> GattServer<A> {
    /// Create a stopped server on top of the given adapter
    pub fn new(adapter: A) -> Self {
        Self::with_config(adapter, GattServerConfig::default())
    }

    pub fn with_config(adapter: A, config: GattServerConfig) -> Self {
        Self {
            adapter,
            service: echo_service(config.time_readable),
            config,
            server: None,
            peers: BTreeSet::new(),
            client_configurations: HashMap::new(),
            events: EventQueue::new(),
            log: ActivityLog::new("bletestbed::server"),
        }
    }

    /// Set GATT server configuration. Takes effect on the next start.
    pub fn set_config(&mut self, config: GattServerConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &GattServerConfig {
        &self.config
    }

    pub fn set_log_callback(&mut self, callback: LogCallback) {
        self.log.set_callback(callback);
    }

    /// Posting end of the serial queue, handed to the platform adapter
    pub fn event_sender(&self) -> EventSender<ServerEvent> {
        self.events.sender()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn connected_peers(&self) -> Vec<BdAddr> {
        self.peers.iter().copied().collect()
    }

    pub fn is_connected(&self, peer: &BdAddr) -> bool {
        self.peers.contains(peer)
    }

    pub fn client_configuration(&self, peer: &BdAddr) -> Option<&[u8]> {
        self.client_configurations.get(peer).map(Vec::as_slice)
    }

    pub fn characteristic_value(&self, characteristic: &Uuid) -> Option<&[u8]> {
        self.service
            .characteristic(characteristic)
            .map(|c| c.value.as_slice())
    }

    /// Register the service, then start advertising it
    pub fn start(&mut self) -> GattResult<()> {
        self.start_service()?;
        self.start_advertising();
        Ok(())
    }

    /// Stop advertising, then unregister the service
    pub fn stop(&mut self) {
        self.stop_advertising();
        self.stop_service();
    }

    pub fn restart(&mut self) -> GattResult<()> {
        self.stop();
        self.start()
    }

    /// Register the service tree with the platform.
    ///
    /// A server that is already running is torn down first so restarts never
    /// leave a stale registration behind.
    pub fn start_service(&mut self) -> GattResult<()> {
        if self.server.is_some() {
            self.stop_service();
        }

        let server = self
            .adapter
            .open_gatt_server()
            .ok_or_else(|| GattError::Adapter("unable to open GATT server".into()))?;

        self.service = echo_service(self.config.time_readable);
        if !self.adapter.add_service(server, &self.service) {
            self.adapter.close_gatt_server(server);
            self.log.error("Unable to add service to GATT server");
            return Err(GattError::NotInitiated("add service"));
        }

        self.server = Some(server);
        self.log
            .info(&format!("GATT server started with service {}", self.service.uuid));
        Ok(())
    }

    /// Unregister the service. No-op when nothing is registered.
    ///
    /// Closing the server drops every connection, so peer and subscription
    /// state goes with it.
    pub fn stop_service(&mut self) {
        if let Some(server) = self.server.take() {
            self.adapter.close_gatt_server(server);
            self.peers.clear();
            self.client_configurations.clear();
            self.log.info("GATT server stopped");
        }
    }

    pub fn start_advertising(&mut self) -> bool {
        let started = self
            .adapter
            .start_advertising(&SERVICE_UUID, &self.config.advertise);
        if !started {
            self.log.error("Unable to start advertising");
        }
        started
    }

    pub fn stop_advertising(&mut self) {
        self.adapter.stop_advertising();
    }

    /// Handle every pending platform callback, in arrival order
    pub fn process_events(&mut self) {
        while let Some(event) = self.events.next() {
            self.handle_event(event);
        }
    }

    /// Dispatch one platform callback to its handler
    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::AdvertisingStarted => {
                self.log.info("Peripheral advertising started.");
                return;
            }
            ServerEvent::AdvertisingFailed(code) => {
                self.log
                    .error(&format!("Peripheral advertising failed: {}", code));
                return;
            }
            _ => {}
        }

        if self.server.is_none() {
            self.log
                .debug(&format!("GATT server not running, ignoring {:?}", event));
            return;
        }

        match event {
            ServerEvent::ConnectionStateChanged {
                peer,
                status,
                state,
            } => self.on_connection_state_change(peer, status, state),
            ServerEvent::CharacteristicReadRequest {
                peer,
                request_id,
                offset,
                characteristic,
            } => self.on_read_request(peer, request_id, offset, &characteristic),
            ServerEvent::CharacteristicWriteRequest {
                peer,
                request_id,
                characteristic,
                response_needed,
                offset,
                value,
            } => self.on_write_request(
                peer,
                request_id,
                &characteristic,
                response_needed,
                offset,
                &value,
            ),
            ServerEvent::DescriptorReadRequest {
                peer,
                request_id,
                offset,
                characteristic,
                descriptor,
            } => self.on_descriptor_read_request(
                peer,
                request_id,
                offset,
                &characteristic,
                &descriptor,
            ),
            ServerEvent::DescriptorWriteRequest {
                peer,
                request_id,
                characteristic,
                descriptor,
                value,
                ..
            } => self.on_descriptor_write_request(
                peer,
                request_id,
                &characteristic,
                &descriptor,
                &value,
            ),
            ServerEvent::NotificationSent { peer, status } => {
                self.on_notification_sent(peer, status)
            }
            ServerEvent::Notify {
                characteristic,
                value,
            } => {
                if let Err(e) = self.notify(&characteristic, &value) {
                    self.log.error(&format!("Notify failed: {}", e));
                }
            }
            ServerEvent::AdvertisingStarted | ServerEvent::AdvertisingFailed(_) => {}
        }
    }

    pub fn on_connection_state_change(
        &mut self,
        peer: BdAddr,
        status: GattStatus,
        state: ConnectionState,
    ) {
        self.log.info(&format!(
            "onConnectionStateChange {} status {:?} newState {:?}",
            peer, status, state
        ));

        match state {
            ConnectionState::Connected => self.on_peer_connected(peer),
            ConnectionState::Disconnected => self.on_peer_disconnected(peer),
            ConnectionState::Connecting | ConnectionState::Disconnecting => {}
        }
    }

    pub fn on_peer_connected(&mut self, peer: BdAddr) {
        self.log.info(&format!("Device added: {}", peer));
        self.peers.insert(peer);
    }

    pub fn on_peer_disconnected(&mut self, peer: BdAddr) {
        self.log.info(&format!("Device removed: {}", peer));
        self.peers.remove(&peer);
        self.client_configurations.remove(&peer);
    }

    /// Answer a characteristic read.
    ///
    /// Reads the platform would otherwise reject silently (no read permission,
    /// unknown characteristic) get an explicit failure so the peer's request
    /// does not time out. Payloads are short, so the whole value from
    /// `offset` is returned in one response.
    pub fn on_read_request(
        &mut self,
        peer: BdAddr,
        request_id: u32,
        offset: usize,
        characteristic: &Uuid,
    ) {
        self.log
            .info(&format!("onCharacteristicReadRequest {}", characteristic));

        let (status, value) = match self.service.characteristic(characteristic) {
            None => (GattStatus::Failure, None),
            Some(c) if !c.is_readable() => {
                if !c.requires_response() {
                    return;
                }
                (GattStatus::Failure, None)
            }
            Some(c) => match c.value.get(offset..) {
                Some(tail) => (GattStatus::Success, Some(tail.to_vec())),
                None => (GattStatus::InvalidOffset, None),
            },
        };

        self.send_response(peer, request_id, status, offset, value.as_deref());
    }

    /// Handle a characteristic write.
    ///
    /// Echo writes are acknowledged whether or not a response was requested,
    /// then the reversed payload is pushed to every subscribed peer, writer
    /// included. Writes to any other characteristic change nothing.
    pub fn on_write_request(
        &mut self,
        peer: BdAddr,
        request_id: u32,
        characteristic: &Uuid,
        response_needed: bool,
        offset: usize,
        value: &[u8],
    ) {
        self.log.info(&format!(
            "onCharacteristicWriteRequest {} Received: {}",
            characteristic,
            hex_format(value)
        ));

        if !is_echo_characteristic(characteristic) {
            if response_needed {
                self.send_response(peer, request_id, GattStatus::Failure, offset, None);
            }
            return;
        }

        self.send_response(peer, request_id, GattStatus::Success, 0, None);

        // notify stores the reversed bytes as the echo value
        let response = reverse(value);
        self.log
            .info(&format!("Sending: {}", hex_format(&response)));
        if let Err(e) = self.notify(&CHARACTERISTIC_ECHO_UUID, &response) {
            self.log.error(&format!("Echo notify failed: {}", e));
        }
    }

    /// Answer a descriptor read. The client configuration descriptor reports
    /// the requesting peer's own value.
    pub fn on_descriptor_read_request(
        &mut self,
        peer: BdAddr,
        request_id: u32,
        offset: usize,
        characteristic: &Uuid,
        descriptor: &Uuid,
    ) {
        self.log.info(&format!(
            "onDescriptorReadRequest {} on {}",
            descriptor, characteristic
        ));

        if is_client_configuration_descriptor(descriptor) {
            let value = self
                .client_configurations
                .get(&peer)
                .cloned()
                .unwrap_or_else(|| DISABLE_NOTIFICATION_VALUE.to_vec());
            self.send_response(peer, request_id, GattStatus::Success, offset, Some(&value));
        } else {
            self.send_response(peer, request_id, GattStatus::Failure, offset, None);
        }
    }

    /// Record a client configuration write for the peer.
    ///
    /// Writes to any other descriptor are left unanswered.
    pub fn on_descriptor_write_request(
        &mut self,
        peer: BdAddr,
        request_id: u32,
        characteristic: &Uuid,
        descriptor: &Uuid,
        value: &[u8],
    ) {
        self.log.info(&format!(
            "onDescriptorWriteRequest: {} on {} value: {}",
            descriptor,
            characteristic,
            hex_format(value)
        ));

        if is_client_configuration_descriptor(descriptor) {
            self.client_configurations.insert(peer, value.to_vec());
            self.send_response(peer, request_id, GattStatus::Success, 0, None);
        }
    }

    pub fn on_notification_sent(&mut self, peer: BdAddr, status: GattStatus) {
        self.log
            .debug(&format!("onNotificationSent {} status {:?}", peer, status));
    }

    /// Store a new value on the characteristic and push it to every connected
    /// peer that has notifications enabled.
    ///
    /// Characteristics with the indicate property are pushed as indications.
    /// Returns the number of peers the push was initiated for.
    pub fn notify(&mut self, characteristic: &Uuid, value: &[u8]) -> GattResult<usize> {
        let server = self.server.ok_or(GattError::ServerNotRunning)?;

        let target = self
            .service
            .characteristic_mut(characteristic)
            .ok_or(GattError::CharacteristicNotFound(*characteristic))?;
        target.value = value.to_vec();
        let target = target.clone();

        self.log.info(&format!(
            "Notifying characteristic {}, new value: {}",
            characteristic,
            hex_format(value)
        ));

        let confirm = target.requires_confirmation();
        let recipients: Vec<BdAddr> = self
            .peers
            .iter()
            .filter(|peer| self.peer_enabled_notifications(peer, &target))
            .copied()
            .collect();

        let mut pushed = 0;
        for peer in recipients {
            if self
                .adapter
                .notify_characteristic_changed(server, &peer, characteristic, value, confirm)
            {
                pushed += 1;
            } else {
                self.log
                    .error(&format!("Unable to notify {} of {}", peer, characteristic));
            }
        }
        Ok(pushed)
    }

    /// Push the current local time on the time characteristic
    pub fn send_timestamp(&mut self) -> GattResult<usize> {
        let value = timestamp_bytes(&Local::now());
        self.notify(&CHARACTERISTIC_TIME_UUID, &value)
    }

    /// Whether `peer` should receive pushes for `characteristic`.
    ///
    /// Characteristics without a client configuration descriptor are always
    /// on. Otherwise the peer must have written a value that enables
    /// notifications. Unknown characteristics are never on.
    pub fn client_enabled_notifications(&self, peer: &BdAddr, characteristic: &Uuid) -> bool {
        self.service
            .characteristic(characteristic)
            .map_or(false, |c| self.peer_enabled_notifications(peer, c))
    }

    fn peer_enabled_notifications(&self, peer: &BdAddr, characteristic: &Characteristic) -> bool {
        if characteristic.client_configuration_descriptor().is_none() {
            return true;
        }
        self.client_configurations
            .get(peer)
            .map_or(false, |value| configuration_enables_notifications(value))
    }

    fn send_response(
        &mut self,
        peer: BdAddr,
        request_id: u32,
        status: GattStatus,
        offset: usize,
        value: Option<&[u8]>,
    ) {
        let Some(server) = self.server else {
            self.log
                .debug(&format!("No server, dropping response to {}", peer));
            return;
        };
        if !self
            .adapter
            .send_response(server, &peer, request_id, status, offset, value)
        {
            self.log.error(&format!(
                "Unable to send response {:?} to {} for request {}",
                status, peer, request_id
            ));
        }
    }
}

impl<A: PeripheralAdapter> Drop for GattServer<A> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_enable_mask() {
        assert!(configuration_enables_notifications(&[0x01, 0x00]));
        assert!(configuration_enables_notifications(&[0x03, 0x00]));
        assert!(configuration_enables_notifications(&[0x01, 0x80]));
        assert!(!configuration_enables_notifications(&[0x00, 0x00]));
        assert!(!configuration_enables_notifications(&[0x02, 0x00]));
        assert!(!configuration_enables_notifications(&[0x01]));
        assert!(!configuration_enables_notifications(&[]));
    }

    #[test]
    fn test_default_config() {
        let config = GattServerConfig::default();
        assert!(!config.time_readable);
        assert!(config.advertise.connectable);
        assert_eq!(config.advertise.timeout_ms, 0);
    }
}
