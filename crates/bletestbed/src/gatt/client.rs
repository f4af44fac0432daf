//! GATT Client (central role)
//!
//! Drives one outbound session through scan, connect, service discovery and
//! the notification handshake, then exchanges echo messages with the
//! peripheral.
//!
//! All platform completions arrive as [`ClientEvent`]s on the client's serial
//! queue. Each event carries the connection it belongs to; events for any
//! connection other than the live one are dropped, so callbacks that arrive
//! after a teardown never touch the reset state.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::activity::{ActivityLog, LogCallback};
use super::adapter::{CentralAdapter, ClientEvent, ConnectionHandle, ScanFilter, ScanMode};
use super::types::{BdAddr, Characteristic, ConnectionState, Device, GattStatus, Service, WriteType};
use crate::codec::{bytes_from_string, hex_format, string_from_bytes};
use crate::error::{GattError, GattResult};
use crate::queue::{EventQueue, EventSender};
use crate::registry::{
    find_characteristics, find_characteristics_mut, find_service, is_client_configuration_descriptor,
    is_echo_characteristic, is_time_characteristic, CHARACTERISTIC_ECHO_UUID, CHARACTERISTIC_TIME_UUID,
    ENABLE_NOTIFICATION_VALUE, SCAN_PERIOD, SERVICE_UUID,
};
use crate::scan::ScanResultAggregator;
use crate::uuid::Uuid;

/// Receives every decoded message pushed or read from the peripheral
pub type MessageCallback = Box<dyn Fn(&Uuid, &str) + Send + 'static>;

/// Where the session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    ServiceDiscovery,
    Subscribing,
    Ready,
    Disconnected,
}

/// GATT Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattClientConfig {
    /// Scan window; the scan stops on its own once it elapses
    pub scan_period: Duration,
    pub scan_mode: ScanMode,
    /// Let the platform reconnect on its own when the peer comes back
    pub auto_connect: bool,
}

impl Default for GattClientConfig {
    fn default() -> Self {
        Self {
            scan_period: SCAN_PERIOD,
            scan_mode: ScanMode::LowPower,
            auto_connect: false,
        }
    }
}

/// Central session manager
pub struct GattClient<A: CentralAdapter> {
    adapter: A,
    config: GattClientConfig,
    state: SessionState,
    connection: Option<ConnectionHandle>,
    connected: bool,
    time_subscribed: bool,
    echo_subscribed: bool,
    /// Attribute tree from the last successful discovery
    services: Vec<Service>,
    aggregator: ScanResultAggregator,
    /// Result set of the last finished scan window
    scan_results: BTreeMap<BdAddr, Device>,
    scan_deadline: Option<Instant>,
    events: EventQueue<ClientEvent>,
    message_callback: Option<MessageCallback>,
    log: ActivityLog,
}

impl<A: CentralAdapter> std::fmt::Debug for GattClient<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattClient")
            .field("state", &self.state)
            .field("connection", &self.connection)
            .field("connected", &self.connected)
            .field("time_subscribed", &self.time_subscribed)
            .field("echo_subscribed", &self.echo_subscribed)
            .field("scan_deadline", &self.scan_deadline)
            .field("log", &self.log)
            .finish()
    }
}

impl<A: CentralAdapter> GattClient<A> {
    pub fn new(adapter: A) -> Self {
        Self::with_config(adapter, GattClientConfig::default())
    }

    pub fn with_config(adapter: A, config: GattClientConfig) -> Self {
        Self {
            adapter,
            config,
            state: SessionState::Idle,
            connection: None,
            connected: false,
            time_subscribed: false,
            echo_subscribed: false,
            services: Vec::new(),
            aggregator: ScanResultAggregator::new(),
            scan_results: BTreeMap::new(),
            scan_deadline: None,
            events: EventQueue::new(),
            message_callback: None,
            log: ActivityLog::new("bletestbed::client"),
        }
    }

    /// Set GATT client configuration. Applies from the next scan or connect.
    pub fn set_config(&mut self, config: GattClientConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &GattClientConfig {
        &self.config
    }

    pub fn set_log_callback(&mut self, callback: LogCallback) {
        self.log.set_callback(callback);
    }

    pub fn set_message_callback<F>(&mut self, callback: F)
    where
        F: Fn(&Uuid, &str) + Send + 'static,
    {
        self.message_callback = Some(Box::new(callback));
    }

    /// Posting end of the serial queue, handed to the platform adapter
    pub fn event_sender(&self) -> EventSender<ClientEvent> {
        self.events.sender()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_time_subscribed(&self) -> bool {
        self.time_subscribed
    }

    pub fn is_echo_subscribed(&self) -> bool {
        self.echo_subscribed
    }

    /// Connected with both subscriptions in place
    pub fn is_ready(&self) -> bool {
        self.connected && self.time_subscribed && self.echo_subscribed
    }

    pub fn is_scanning(&self) -> bool {
        self.state == SessionState::Scanning
    }

    pub fn scan_deadline(&self) -> Option<Instant> {
        self.scan_deadline
    }

    /// Devices found by the last finished scan
    pub fn scan_results(&self) -> &BTreeMap<BdAddr, Device> {
        &self.scan_results
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Begin a scan window filtered on the echo service.
    ///
    /// Does nothing while a scan is running. Fails without side effects when
    /// the adapter reports Bluetooth or permissions unavailable. Any live
    /// connection is torn down first.
    pub fn start_scan(&mut self) -> GattResult<()> {
        if self.is_scanning() {
            self.log.debug("Already scanning");
            return Ok(());
        }
        if !self.adapter.scan_prerequisites_met() {
            return Err(GattError::NotReady("bluetooth unavailable"));
        }

        self.disconnect();

        self.aggregator.reset();
        let filters = [ScanFilter {
            service_uuid: SERVICE_UUID,
        }];
        if !self.adapter.start_scan(&filters, self.config.scan_mode) {
            self.log.error("Unable to start scan");
            return Err(GattError::NotInitiated("scan"));
        }

        self.scan_deadline = Some(Instant::now() + self.config.scan_period);
        self.update_state(SessionState::Scanning);
        self.log.info("Started scanning.");
        Ok(())
    }

    /// End the scan window and publish its result set. Idempotent.
    pub fn stop_scan(&mut self) -> &BTreeMap<BdAddr, Device> {
        self.scan_deadline = None;
        if self.is_scanning() {
            self.adapter.stop_scan();
            self.scan_results = self.aggregator.snapshot();
            self.update_state(SessionState::Idle);
            self.log.info(&format!(
                "Stopped scanning, {} device(s) found.",
                self.scan_results.len()
            ));
        }
        &self.scan_results
    }

    /// Fire the scan timeout once `now` reaches the deadline.
    ///
    /// Returns true when this call ended the scan.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.scan_deadline {
            Some(deadline) if now >= deadline => {
                self.stop_scan();
                true
            }
            _ => false,
        }
    }

    /// Open a connection to `device`, replacing any existing one
    pub fn connect(&mut self, device: &Device) -> GattResult<()> {
        if self.is_scanning() {
            self.stop_scan();
        }
        self.disconnect();

        self.log.info(&format!("Connecting to {}", device.address));
        let connection = self
            .adapter
            .connect_gatt(device, self.config.auto_connect)
            .ok_or(GattError::NotInitiated("connect"))?;

        self.connection = Some(connection);
        self.update_state(SessionState::Connecting);
        Ok(())
    }

    /// Drop the connection and reset every readiness flag.
    ///
    /// Safe to call at any time. Only moves to `Disconnected` when a
    /// connection existed.
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.time_subscribed = false;
        self.echo_subscribed = false;
        self.services.clear();

        if let Some(connection) = self.connection.take() {
            self.adapter.disconnect(connection);
            self.adapter.close(connection);
            self.update_state(SessionState::Disconnected);
            self.log.info("Disconnected");
        }
    }

    /// Write `message` to the echo characteristic.
    ///
    /// Success means the write was initiated; its confirmation arrives later
    /// as a [`ClientEvent::CharacteristicWrite`].
    pub fn send_message(&mut self, message: &[u8]) -> GattResult<()> {
        if !self.connected {
            return Err(GattError::NotConnected);
        }
        if !self.echo_subscribed {
            return Err(GattError::NotReady("echo characteristic not subscribed"));
        }

        let (connection, echo) = self.session_characteristic(&CHARACTERISTIC_ECHO_UUID)?;
        let (uuid, write_type) = (echo.uuid, echo.write_type);

        if message.is_empty() {
            self.log.error("Unable to send an empty message");
            return Err(GattError::EmptyMessage);
        }

        self.log.info(&format!("Sending message: {}", hex_format(message)));
        if self
            .adapter
            .write_characteristic(connection, &uuid, message, write_type)
        {
            self.log.info("Message sent");
            Ok(())
        } else {
            self.log.error("Failed to send message");
            Err(GattError::NotInitiated("write characteristic"))
        }
    }

    pub fn send_text(&mut self, message: &str) -> GattResult<()> {
        self.send_message(&bytes_from_string(message))
    }

    /// Read the time characteristic. The peripheral normally refuses; that
    /// refusal is reported but leaves the session up.
    pub fn request_time(&mut self) -> GattResult<()> {
        let (connection, time) = self.session_characteristic(&CHARACTERISTIC_TIME_UUID)?;
        let uuid = time.uuid;

        if self.adapter.read_characteristic(connection, &uuid) {
            Ok(())
        } else {
            self.log.error("Failed to read time characteristic");
            Err(GattError::NotInitiated("read characteristic"))
        }
    }

    /// The live connection and a characteristic of the discovered echo service
    fn session_characteristic(
        &self,
        characteristic: &Uuid,
    ) -> GattResult<(ConnectionHandle, &Characteristic)> {
        let connection = match self.connection {
            Some(connection) if self.connected => connection,
            _ => return Err(GattError::NotConnected),
        };
        let found = find_service(&self.services)
            .ok_or(GattError::ServiceNotFound)?
            .characteristic(characteristic)
            .ok_or(GattError::CharacteristicNotFound(*characteristic))?;
        Ok((connection, found))
    }

    /// Handle every pending platform callback, in arrival order
    pub fn process_events(&mut self) {
        while let Some(event) = self.events.next() {
            self.handle_event(event);
        }
    }

    /// Dispatch one platform callback to its handler
    pub fn handle_event(&mut self, event: ClientEvent) {
        if let Some(connection) = event.connection() {
            if self.connection != Some(connection) {
                self.log
                    .debug(&format!("Ignoring event for stale connection {:?}", connection));
                return;
            }
        }

        match event {
            ClientEvent::ScanResult(device) => self.on_scan_result(device),
            ClientEvent::BatchScanResults(devices) => self.on_batch_scan_results(devices),
            ClientEvent::ScanFailed(code) => self.on_scan_failed(code),
            ClientEvent::ConnectionStateChanged { status, state, .. } => {
                self.on_connection_state_change(status, state)
            }
            ClientEvent::ServicesDiscovered {
                status, services, ..
            } => self.on_services_discovered(status, services),
            ClientEvent::CharacteristicWrite {
                characteristic,
                status,
                ..
            } => self.on_characteristic_write(&characteristic, status),
            ClientEvent::CharacteristicRead {
                characteristic,
                status,
                value,
                ..
            } => self.on_characteristic_read(&characteristic, status, &value),
            ClientEvent::CharacteristicChanged {
                characteristic,
                value,
                ..
            } => self.on_characteristic_changed(&characteristic, &value),
            ClientEvent::DescriptorWrite {
                characteristic,
                descriptor,
                status,
                ..
            } => self.on_descriptor_write(&characteristic, &descriptor, status),
        }
    }

    fn on_scan_result(&mut self, device: Device) {
        if !self.is_scanning() {
            return;
        }
        self.aggregator.add_result(device);
    }

    fn on_batch_scan_results(&mut self, devices: Vec<Device>) {
        if !self.is_scanning() {
            return;
        }
        for device in devices {
            self.aggregator.add_result(device);
        }
    }

    fn on_scan_failed(&mut self, code: i32) {
        self.log.error(&format!("BLE Scan Failed with code {}", code));
    }

    fn on_connection_state_change(&mut self, status: GattStatus, state: ConnectionState) {
        self.log.info(&format!(
            "onConnectionStateChange status {:?} newState {:?}",
            status, state
        ));

        if !status.is_success() {
            self.log
                .error(&format!("Connection Gatt failure status {:?}", status));
            self.disconnect();
            return;
        }

        match state {
            ConnectionState::Connected => {
                self.log.info("Connected to device");
                self.connected = true;
                self.update_state(SessionState::ServiceDiscovery);
                let started = self
                    .connection
                    .map_or(false, |c| self.adapter.discover_services(c));
                if !started {
                    self.log.error("Unable to start service discovery");
                    self.disconnect();
                }
            }
            ConnectionState::Disconnected => {
                self.log.info("Disconnected from device");
                self.disconnect();
            }
            ConnectionState::Connecting | ConnectionState::Disconnecting => {}
        }
    }

    fn on_services_discovered(&mut self, status: GattStatus, services: Vec<Service>) {
        if !status.is_success() {
            self.log
                .error(&format!("Device service discovery unsuccessful, status {:?}", status));
            self.disconnect();
            return;
        }

        self.services = services;
        for characteristic in find_characteristics_mut(&mut self.services) {
            characteristic.write_type = WriteType::Default;
        }

        let matching: Vec<Characteristic> = find_characteristics(&self.services)
            .into_iter()
            .cloned()
            .collect();
        if matching.is_empty() {
            self.log.error("Unable to find characteristics.");
            self.disconnect();
            return;
        }

        self.log.info("Initializing: setting write type and enabling notification");
        self.update_state(SessionState::Subscribing);
        for characteristic in &matching {
            self.enable_characteristic_notification(characteristic);
        }
    }

    /// Turn on notifications for one characteristic.
    ///
    /// Echo counts as subscribed as soon as the platform accepts it. Time
    /// counts only once its configuration descriptor write completes.
    fn enable_characteristic_notification(&mut self, characteristic: &Characteristic) -> bool {
        let Some(connection) = self.connection else {
            return false;
        };

        let initiated =
            self.adapter
                .set_characteristic_notification(connection, &characteristic.uuid, true);
        self.log.info(&format!(
            "Characteristic notification set for {}: {}",
            characteristic.uuid, initiated
        ));
        if !initiated {
            self.log
                .error(&format!("Unable to enable notification on {}", characteristic.uuid));
            return false;
        }

        if is_echo_characteristic(&characteristic.uuid) {
            self.mark_subscribed(&characteristic.uuid);
            return true;
        }

        let Some(descriptor) = characteristic.client_configuration_descriptor() else {
            self.log
                .error("Unable to find Characteristic Configuration Descriptor");
            return false;
        };
        let written = self.adapter.write_descriptor(
            connection,
            &characteristic.uuid,
            &descriptor.uuid,
            &ENABLE_NOTIFICATION_VALUE,
        );
        if !written {
            self.log.error(&format!(
                "Unable to write configuration descriptor of {}",
                characteristic.uuid
            ));
        }
        written
    }

    fn on_descriptor_write(&mut self, characteristic: &Uuid, descriptor: &Uuid, status: GattStatus) {
        if !status.is_success() {
            self.log.error(&format!(
                "Descriptor write unsuccessful for {}: {:?}",
                descriptor, status
            ));
            return;
        }

        self.log.info(&format!("Descriptor written successfully: {}", descriptor));
        if is_client_configuration_descriptor(descriptor) {
            self.mark_subscribed(characteristic);
        }
    }

    fn on_characteristic_write(&mut self, characteristic: &Uuid, status: GattStatus) {
        if status.is_success() {
            self.log
                .info(&format!("Characteristic written successfully: {}", characteristic));
        } else {
            self.log.error(&format!(
                "Characteristic write unsuccessful, status: {:?}",
                status
            ));
            self.disconnect();
        }
    }

    fn on_characteristic_read(&mut self, characteristic: &Uuid, status: GattStatus, value: &[u8]) {
        if status.is_success() {
            self.log
                .info(&format!("Characteristic read successfully: {}", characteristic));
            self.deliver_message(characteristic, value);
        } else {
            self.log.error(&format!(
                "Characteristic read unsuccessful, status: {:?}",
                status
            ));
        }
    }

    fn on_characteristic_changed(&mut self, characteristic: &Uuid, value: &[u8]) {
        self.log.info(&format!(
            "Characteristic changed, {} Received: {}",
            characteristic,
            hex_format(value)
        ));
        self.deliver_message(characteristic, value);
    }

    /// Decode a pushed or read value and hand it to the message callback
    fn deliver_message(&mut self, characteristic: &Uuid, value: &[u8]) {
        if let Some(cached) = self
            .services
            .iter_mut()
            .flat_map(|s| s.characteristics.iter_mut())
            .find(|c| c.uuid == *characteristic)
        {
            cached.value = value.to_vec();
        }

        match string_from_bytes(value) {
            Some(message) => {
                self.log.info(&format!("Received message: {}", message));
                if let Some(callback) = &self.message_callback {
                    callback(characteristic, &message);
                }
            }
            None => self.log.error("Unable to convert bytes to string"),
        }
    }

    fn mark_subscribed(&mut self, characteristic: &Uuid) {
        if is_echo_characteristic(characteristic) {
            self.echo_subscribed = true;
        } else if is_time_characteristic(characteristic) {
            self.time_subscribed = true;
        }
        self.refresh_ready();
    }

    fn refresh_ready(&mut self) {
        if self.is_ready() && self.state != SessionState::Ready {
            self.update_state(SessionState::Ready);
            self.log.info("Initialized.");
        }
    }

    fn update_state(&mut self, state: SessionState) {
        if self.state != state {
            self.log
                .debug(&format!("Session state {:?} -> {:?}", self.state, state));
            self.state = state;
        }
    }
}

impl<A: CentralAdapter> Drop for GattClient<A> {
    fn drop(&mut self) {
        self.stop_scan();
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GattClientConfig::default();
        assert_eq!(config.scan_period, Duration::from_millis(5000));
        assert_eq!(config.scan_mode, ScanMode::LowPower);
        assert!(!config.auto_connect);
    }
}
