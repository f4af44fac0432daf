//! In-memory loopback radio
//!
//! Implements both adapter traits on top of one shared radio so a
//! [`GattServer`] and any number of [`GattClient`]s can talk to each other
//! inside one process. Every request, response and notification is routed by
//! posting the matching callback to the receiving manager's serial queue;
//! nothing is delivered until that manager calls `process_events`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace, warn};

use crate::gatt::adapter::{
    AdvertiseSettings, CentralAdapter, ClientEvent, ConnectionHandle, PeripheralAdapter,
    ScanFilter, ScanMode, ServerEvent, ServerHandle,
};
use crate::gatt::client::{GattClient, GattClientConfig};
use crate::gatt::server::{GattServer, GattServerConfig};
use crate::gatt::types::{BdAddr, ConnectionState, Device, GattStatus, Service, WriteType};
use crate::queue::EventSender;
use crate::uuid::Uuid;

/// Signal strength reported for the loopback peripheral
const LOOPBACK_RSSI: i16 = -42;

/// A request forwarded to the peripheral, waiting for its response
#[derive(Debug, Clone)]
enum PendingRequest {
    WriteCharacteristic {
        connection: ConnectionHandle,
        characteristic: Uuid,
    },
    ReadCharacteristic {
        connection: ConnectionHandle,
        characteristic: Uuid,
    },
    WriteDescriptor {
        connection: ConnectionHandle,
        characteristic: Uuid,
        descriptor: Uuid,
    },
}

impl PendingRequest {
    fn connection(&self) -> ConnectionHandle {
        match self {
            PendingRequest::WriteCharacteristic { connection, .. }
            | PendingRequest::ReadCharacteristic { connection, .. }
            | PendingRequest::WriteDescriptor { connection, .. } => *connection,
        }
    }
}

/// One central's connection to the peripheral
#[derive(Debug)]
struct Link {
    central: BdAddr,
    events: EventSender<ClientEvent>,
    /// Characteristics the central enabled locally
    notifications: HashSet<Uuid>,
}

#[derive(Debug)]
struct Peripheral {
    address: BdAddr,
    name: String,
    events: Option<EventSender<ServerEvent>>,
    server: Option<ServerHandle>,
    service: Option<Service>,
    advertising: Option<Uuid>,
}

#[derive(Debug)]
struct Radio {
    powered: bool,
    peripheral: Option<Peripheral>,
    links: HashMap<ConnectionHandle, Link>,
    pending: HashMap<u32, PendingRequest>,
    next_handle: u32,
    next_request: u32,
}

impl Radio {
    fn allocate_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn allocate_request(&mut self) -> u32 {
        self.next_request += 1;
        self.next_request
    }

    fn post_server(&self, event: ServerEvent) {
        match self.peripheral.as_ref().and_then(|p| p.events.as_ref()) {
            Some(events) => events.post(event),
            None => trace!("No peripheral attached, dropping {:?}", event),
        }
    }

    /// The open peripheral's service, if a central could reach it right now
    fn reachable_service(&self, address: &BdAddr) -> Option<&Service> {
        self.peripheral
            .as_ref()
            .filter(|p| p.address == *address && p.server.is_some())
            .and_then(|p| p.service.as_ref())
    }

    /// Forward a request to the peripheral under a fresh request id
    fn forward(&mut self, request: PendingRequest, build: impl FnOnce(BdAddr, u32) -> ServerEvent) -> bool {
        let Some(central) = self.links.get(&request.connection()).map(|l| l.central) else {
            return false;
        };
        let request_id = self.allocate_request();
        self.pending.insert(request_id, request);
        self.post_server(build(central, request_id));
        true
    }

    fn drop_link(&mut self, connection: ConnectionHandle) -> Option<Link> {
        self.pending.retain(|_, r| r.connection() != connection);
        self.links.remove(&connection)
    }
}

/// Shared in-memory radio. Clones refer to the same radio.
#[derive(Debug, Clone)]
pub struct LoopbackRadio {
    radio: Arc<Mutex<Radio>>,
}

impl Default for LoopbackRadio {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(radio: &Mutex<Radio>) -> MutexGuard<'_, Radio> {
    radio.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackRadio {
    pub fn new() -> Self {
        Self {
            radio: Arc::new(Mutex::new(Radio {
                powered: true,
                peripheral: None,
                links: HashMap::new(),
                pending: HashMap::new(),
                next_handle: 0,
                next_request: 0,
            })),
        }
    }

    /// Simulate Bluetooth being switched off or on for scanning
    pub fn set_powered(&self, powered: bool) {
        lock(&self.radio).powered = powered;
    }

    /// Number of live central connections
    pub fn link_count(&self) -> usize {
        lock(&self.radio).links.len()
    }

    /// Register the single peripheral of this radio, replacing any previous one
    pub fn peripheral(&self, address: BdAddr, name: &str) -> LoopbackPeripheral {
        lock(&self.radio).peripheral = Some(Peripheral {
            address,
            name: name.to_string(),
            events: None,
            server: None,
            service: None,
            advertising: None,
        });
        LoopbackPeripheral {
            radio: Arc::clone(&self.radio),
        }
    }

    pub fn central(&self, address: BdAddr) -> LoopbackCentral {
        LoopbackCentral {
            radio: Arc::clone(&self.radio),
            address,
            events: None,
        }
    }

    /// Build a GATT server on a new loopback peripheral, wired to its queue
    pub fn gatt_server(
        &self,
        address: BdAddr,
        name: &str,
        config: GattServerConfig,
    ) -> GattServer<LoopbackPeripheral> {
        let mut server = GattServer::with_config(self.peripheral(address, name), config);
        let events = server.event_sender();
        server.adapter_mut().attach(events);
        server
    }

    /// Build a GATT client on a new loopback central, wired to its queue
    pub fn gatt_client(&self, address: BdAddr, config: GattClientConfig) -> GattClient<LoopbackCentral> {
        let mut client = GattClient::with_config(self.central(address), config);
        let events = client.event_sender();
        client.adapter_mut().attach(events);
        client
    }
}

/// Peripheral end of the loopback radio
#[derive(Debug)]
pub struct LoopbackPeripheral {
    radio: Arc<Mutex<Radio>>,
}

impl LoopbackPeripheral {
    /// Deliver server callbacks to `events`
    pub fn attach(&mut self, events: EventSender<ServerEvent>) {
        if let Some(peripheral) = lock(&self.radio).peripheral.as_mut() {
            peripheral.events = Some(events);
        }
    }

    pub fn is_advertising(&self) -> bool {
        lock(&self.radio)
            .peripheral
            .as_ref()
            .map_or(false, |p| p.advertising.is_some())
    }
}

impl PeripheralAdapter for LoopbackPeripheral {
    fn open_gatt_server(&mut self) -> Option<ServerHandle> {
        let mut radio = lock(&self.radio);
        let handle = ServerHandle(radio.allocate_handle());
        let peripheral = radio.peripheral.as_mut()?;
        peripheral.server = Some(handle);
        Some(handle)
    }

    fn add_service(&mut self, server: ServerHandle, service: &Service) -> bool {
        let mut radio = lock(&self.radio);
        match radio.peripheral.as_mut() {
            Some(p) if p.server == Some(server) => {
                p.service = Some(service.clone());
                true
            }
            _ => false,
        }
    }

    fn close_gatt_server(&mut self, server: ServerHandle) {
        let mut radio = lock(&self.radio);
        match radio.peripheral.as_mut() {
            Some(p) if p.server == Some(server) => {
                p.server = None;
                p.service = None;
            }
            _ => return,
        }

        let connections: Vec<ConnectionHandle> = radio.links.keys().copied().collect();
        for connection in connections {
            if let Some(link) = radio.drop_link(connection) {
                debug!("Server closed, dropping link to {}", link.central);
                link.events.post(ClientEvent::ConnectionStateChanged {
                    connection,
                    status: GattStatus::Success,
                    state: ConnectionState::Disconnected,
                });
            }
        }
    }

    fn notify_characteristic_changed(
        &mut self,
        _server: ServerHandle,
        peer: &BdAddr,
        characteristic: &Uuid,
        value: &[u8],
        _confirm: bool,
    ) -> bool {
        let radio = lock(&self.radio);
        let Some((connection, link)) = radio.links.iter().find(|(_, l)| l.central == *peer) else {
            warn!("Notification for unknown peer {}", peer);
            return false;
        };

        if link.notifications.contains(characteristic) {
            link.events.post(ClientEvent::CharacteristicChanged {
                connection: *connection,
                characteristic: *characteristic,
                value: value.to_vec(),
            });
        } else {
            trace!("{} has {} disabled locally", peer, characteristic);
        }
        radio.post_server(ServerEvent::NotificationSent {
            peer: *peer,
            status: GattStatus::Success,
        });
        true
    }

    fn send_response(
        &mut self,
        _server: ServerHandle,
        _peer: &BdAddr,
        request_id: u32,
        status: GattStatus,
        _offset: usize,
        value: Option<&[u8]>,
    ) -> bool {
        let mut radio = lock(&self.radio);
        let Some(request) = radio.pending.remove(&request_id) else {
            debug!("No pending request {}, response dropped", request_id);
            return true;
        };
        let connection = request.connection();
        let Some(link) = radio.links.get(&connection) else {
            return false;
        };

        let event = match request {
            PendingRequest::WriteCharacteristic { characteristic, .. } => {
                ClientEvent::CharacteristicWrite {
                    connection,
                    characteristic,
                    status,
                }
            }
            PendingRequest::ReadCharacteristic { characteristic, .. } => {
                ClientEvent::CharacteristicRead {
                    connection,
                    characteristic,
                    status,
                    value: value.map(<[u8]>::to_vec).unwrap_or_default(),
                }
            }
            PendingRequest::WriteDescriptor {
                characteristic,
                descriptor,
                ..
            } => ClientEvent::DescriptorWrite {
                connection,
                characteristic,
                descriptor,
                status,
            },
        };
        link.events.post(event);
        true
    }

    fn start_advertising(&mut self, service_uuid: &Uuid, settings: &AdvertiseSettings) -> bool {
        let mut radio = lock(&self.radio);
        let Some(peripheral) = radio.peripheral.as_mut() else {
            return false;
        };
        debug!("Advertising {} with {:?}", service_uuid, settings);
        peripheral.advertising = Some(*service_uuid);
        radio.post_server(ServerEvent::AdvertisingStarted);
        true
    }

    fn stop_advertising(&mut self) {
        if let Some(peripheral) = lock(&self.radio).peripheral.as_mut() {
            peripheral.advertising = None;
        }
    }
}

/// Central end of the loopback radio
#[derive(Debug)]
pub struct LoopbackCentral {
    radio: Arc<Mutex<Radio>>,
    address: BdAddr,
    events: Option<EventSender<ClientEvent>>,
}

impl LoopbackCentral {
    /// Deliver client callbacks to `events`
    pub fn attach(&mut self, events: EventSender<ClientEvent>) {
        self.events = Some(events);
    }

    pub fn address(&self) -> BdAddr {
        self.address
    }

    fn post(&self, event: ClientEvent) {
        match &self.events {
            Some(events) => events.post(event),
            None => trace!("Central {} not attached, dropping {:?}", self.address, event),
        }
    }
}

impl CentralAdapter for LoopbackCentral {
    fn scan_prerequisites_met(&self) -> bool {
        lock(&self.radio).powered
    }

    fn start_scan(&mut self, filters: &[ScanFilter], mode: ScanMode) -> bool {
        let found = {
            let radio = lock(&self.radio);
            radio.peripheral.as_ref().and_then(|p| {
                let advertised = p.advertising?;
                let wanted = filters.is_empty() || filters.iter().any(|f| f.service_uuid == advertised);
                wanted.then(|| Device {
                    address: p.address,
                    name: Some(p.name.clone()),
                    rssi: Some(LOOPBACK_RSSI),
                })
            })
        };

        debug!("Central {} scanning ({:?})", self.address, mode);
        if let Some(device) = found {
            self.post(ClientEvent::ScanResult(device));
        }
        true
    }

    fn stop_scan(&mut self) {}

    fn connect_gatt(&mut self, device: &Device, _auto_connect: bool) -> Option<ConnectionHandle> {
        let events = self.events.clone()?;
        let mut radio = lock(&self.radio);
        let connection = ConnectionHandle(radio.allocate_handle());

        if radio.reachable_service(&device.address).is_none() {
            events.post(ClientEvent::ConnectionStateChanged {
                connection,
                status: GattStatus::Failure,
                state: ConnectionState::Disconnected,
            });
            return Some(connection);
        }

        radio.links.insert(
            connection,
            Link {
                central: self.address,
                events: events.clone(),
                notifications: HashSet::new(),
            },
        );
        radio.post_server(ServerEvent::ConnectionStateChanged {
            peer: self.address,
            status: GattStatus::Success,
            state: ConnectionState::Connected,
        });
        events.post(ClientEvent::ConnectionStateChanged {
            connection,
            status: GattStatus::Success,
            state: ConnectionState::Connected,
        });
        Some(connection)
    }

    fn discover_services(&mut self, connection: ConnectionHandle) -> bool {
        let radio = lock(&self.radio);
        let Some(link) = radio.links.get(&connection) else {
            return false;
        };
        let services: Vec<Service> = radio
            .peripheral
            .as_ref()
            .and_then(|p| p.service.clone())
            .into_iter()
            .collect();
        link.events.post(ClientEvent::ServicesDiscovered {
            connection,
            status: GattStatus::Success,
            services,
        });
        true
    }

    fn set_characteristic_notification(
        &mut self,
        connection: ConnectionHandle,
        characteristic: &Uuid,
        enable: bool,
    ) -> bool {
        let mut radio = lock(&self.radio);
        let Some(link) = radio.links.get_mut(&connection) else {
            return false;
        };
        if enable {
            link.notifications.insert(*characteristic);
        } else {
            link.notifications.remove(characteristic);
        }
        true
    }

    fn write_descriptor(
        &mut self,
        connection: ConnectionHandle,
        characteristic: &Uuid,
        descriptor: &Uuid,
        value: &[u8],
    ) -> bool {
        let (characteristic, descriptor) = (*characteristic, *descriptor);
        lock(&self.radio).forward(
            PendingRequest::WriteDescriptor {
                connection,
                characteristic,
                descriptor,
            },
            |peer, request_id| ServerEvent::DescriptorWriteRequest {
                peer,
                request_id,
                characteristic,
                descriptor,
                response_needed: true,
                value: value.to_vec(),
            },
        )
    }

    fn write_characteristic(
        &mut self,
        connection: ConnectionHandle,
        characteristic: &Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> bool {
        let characteristic = *characteristic;
        let response_needed = write_type != WriteType::NoResponse;
        let mut radio = lock(&self.radio);

        if !response_needed {
            let Some(link) = radio.links.get(&connection) else {
                return false;
            };
            let central = link.central;
            link.events.post(ClientEvent::CharacteristicWrite {
                connection,
                characteristic,
                status: GattStatus::Success,
            });
            let request_id = radio.allocate_request();
            radio.post_server(ServerEvent::CharacteristicWriteRequest {
                peer: central,
                request_id,
                characteristic,
                response_needed,
                offset: 0,
                value: value.to_vec(),
            });
            return true;
        }

        radio.forward(
            PendingRequest::WriteCharacteristic {
                connection,
                characteristic,
            },
            |peer, request_id| ServerEvent::CharacteristicWriteRequest {
                peer,
                request_id,
                characteristic,
                response_needed,
                offset: 0,
                value: value.to_vec(),
            },
        )
    }

    fn read_characteristic(&mut self, connection: ConnectionHandle, characteristic: &Uuid) -> bool {
        let characteristic = *characteristic;
        lock(&self.radio).forward(
            PendingRequest::ReadCharacteristic {
                connection,
                characteristic,
            },
            |peer, request_id| ServerEvent::CharacteristicReadRequest {
                peer,
                request_id,
                offset: 0,
                characteristic,
            },
        )
    }

    fn disconnect(&mut self, connection: ConnectionHandle) {
        let mut radio = lock(&self.radio);
        if let Some(link) = radio.drop_link(connection) {
            radio.post_server(ServerEvent::ConnectionStateChanged {
                peer: link.central,
                status: GattStatus::Success,
                state: ConnectionState::Disconnected,
            });
            link.events.post(ClientEvent::ConnectionStateChanged {
                connection,
                status: GattStatus::Success,
                state: ConnectionState::Disconnected,
            });
        }
    }

    fn close(&mut self, connection: ConnectionHandle) {
        lock(&self.radio).drop_link(connection);
    }
}
