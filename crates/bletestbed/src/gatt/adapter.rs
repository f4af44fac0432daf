//! Platform BLE adapter interface
//!
//! The session managers never touch a radio. Everything they need from the
//! platform stack goes through these traits, and every completion the
//! platform reports comes back as a [`ServerEvent`] or [`ClientEvent`] posted
//! to the manager's serial queue. All calls are fire-and-continue: a `bool`
//! return only says whether the operation was initiated.

use crate::gatt::types::{BdAddr, ConnectionState, Device, GattStatus, Service, WriteType};
use crate::uuid::Uuid;

/// Handle of one outbound GATT connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u32);

/// Handle of an opened GATT server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    LowPower,
    Balanced,
    LowLatency,
}

/// Only report peripherals advertising this service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFilter {
    pub service_uuid: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvertiseMode {
    LowPower,
    #[default]
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxPowerLevel {
    UltraLow,
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    pub connectable: bool,
    /// Zero advertises until stopped
    pub timeout_ms: u32,
    pub tx_power: TxPowerLevel,
    pub include_device_name: bool,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            mode: AdvertiseMode::Balanced,
            connectable: true,
            timeout_ms: 0,
            tx_power: TxPowerLevel::Low,
            include_device_name: true,
        }
    }
}

/// Primitives the peripheral role consumes
pub trait PeripheralAdapter {
    fn open_gatt_server(&mut self) -> Option<ServerHandle>;
    fn add_service(&mut self, server: ServerHandle, service: &Service) -> bool;
    fn close_gatt_server(&mut self, server: ServerHandle);

    fn notify_characteristic_changed(
        &mut self,
        server: ServerHandle,
        peer: &BdAddr,
        characteristic: &Uuid,
        value: &[u8],
        confirm: bool,
    ) -> bool;

    fn send_response(
        &mut self,
        server: ServerHandle,
        peer: &BdAddr,
        request_id: u32,
        status: GattStatus,
        offset: usize,
        value: Option<&[u8]>,
    ) -> bool;

    fn start_advertising(&mut self, service_uuid: &Uuid, settings: &AdvertiseSettings) -> bool;
    fn stop_advertising(&mut self);
}

/// Primitives the central role consumes
pub trait CentralAdapter {
    /// Bluetooth enabled and scan permissions granted
    fn scan_prerequisites_met(&self) -> bool;
    fn start_scan(&mut self, filters: &[ScanFilter], mode: ScanMode) -> bool;
    fn stop_scan(&mut self);

    fn connect_gatt(&mut self, device: &Device, auto_connect: bool) -> Option<ConnectionHandle>;
    fn discover_services(&mut self, connection: ConnectionHandle) -> bool;

    fn set_characteristic_notification(
        &mut self,
        connection: ConnectionHandle,
        characteristic: &Uuid,
        enable: bool,
    ) -> bool;

    fn write_descriptor(
        &mut self,
        connection: ConnectionHandle,
        characteristic: &Uuid,
        descriptor: &Uuid,
        value: &[u8],
    ) -> bool;

    fn write_characteristic(
        &mut self,
        connection: ConnectionHandle,
        characteristic: &Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> bool;

    fn read_characteristic(&mut self, connection: ConnectionHandle, characteristic: &Uuid) -> bool;

    fn disconnect(&mut self, connection: ConnectionHandle);
    fn close(&mut self, connection: ConnectionHandle);
}

/// Callbacks delivered to the peripheral role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ConnectionStateChanged {
        peer: BdAddr,
        status: GattStatus,
        state: ConnectionState,
    },
    CharacteristicReadRequest {
        peer: BdAddr,
        request_id: u32,
        offset: usize,
        characteristic: Uuid,
    },
    CharacteristicWriteRequest {
        peer: BdAddr,
        request_id: u32,
        characteristic: Uuid,
        response_needed: bool,
        offset: usize,
        value: Vec<u8>,
    },
    DescriptorReadRequest {
        peer: BdAddr,
        request_id: u32,
        offset: usize,
        characteristic: Uuid,
        descriptor: Uuid,
    },
    DescriptorWriteRequest {
        peer: BdAddr,
        request_id: u32,
        characteristic: Uuid,
        descriptor: Uuid,
        response_needed: bool,
        value: Vec<u8>,
    },
    NotificationSent {
        peer: BdAddr,
        status: GattStatus,
    },
    AdvertisingStarted,
    AdvertisingFailed(i32),
    /// Push a new value to subscribed peers, e.g. from a "send timestamp" trigger
    Notify {
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Callbacks delivered to the central role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ScanResult(Device),
    BatchScanResults(Vec<Device>),
    ScanFailed(i32),
    ConnectionStateChanged {
        connection: ConnectionHandle,
        status: GattStatus,
        state: ConnectionState,
    },
    ServicesDiscovered {
        connection: ConnectionHandle,
        status: GattStatus,
        services: Vec<Service>,
    },
    CharacteristicWrite {
        connection: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
    },
    CharacteristicRead {
        connection: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    },
    CharacteristicChanged {
        connection: ConnectionHandle,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    DescriptorWrite {
        connection: ConnectionHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        status: GattStatus,
    },
}

impl ClientEvent {
    /// The connection a GATT callback belongs to; `None` for scan callbacks
    pub fn connection(&self) -> Option<ConnectionHandle> {
        match self {
            ClientEvent::ScanResult(_)
            | ClientEvent::BatchScanResults(_)
            | ClientEvent::ScanFailed(_) => None,
            ClientEvent::ConnectionStateChanged { connection, .. }
            | ClientEvent::ServicesDiscovered { connection, .. }
            | ClientEvent::CharacteristicWrite { connection, .. }
            | ClientEvent::CharacteristicRead { connection, .. }
            | ClientEvent::CharacteristicChanged { connection, .. }
            | ClientEvent::DescriptorWrite { connection, .. } => Some(*connection),
        }
    }
}
