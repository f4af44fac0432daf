//! Common types for GATT operations
//!
//! The same service/characteristic/descriptor tree is used by both roles: the
//! peripheral owns one as its service definition, the central receives one
//! from service discovery.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use thiserror::Error;

use super::constants::*;
use crate::registry::is_client_configuration_descriptor;
use crate::uuid::Uuid;

/// Bluetooth device address, the stable identity of a peer.
///
/// Bytes are held in display order, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BdAddrParseError {
    #[error("Address must have 6 colon-separated octets")]
    InvalidLength,

    #[error("Invalid octet: {0}")]
    InvalidOctet(#[from] hex::FromHexError),
}

impl FromStr for BdAddr {
    type Err = BdAddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.split(':').collect();
        if octets.len() != 6 {
            return Err(BdAddrParseError::InvalidLength);
        }

        let mut bytes = [0u8; 6];
        for (byte, octet) in bytes.iter_mut().zip(octets) {
            let mut out = [0u8; 1];
            hex::decode_to_slice(octet, &mut out)?;
            *byte = out[0];
        }
        Ok(Self { bytes })
    }
}

/// A remote device as reported by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub address: BdAddr,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

impl Device {
    pub fn new(address: BdAddr) -> Self {
        Self {
            address,
            name: None,
            rssi: None,
        }
    }
}

bitflags! {
    /// Characteristic properties as advertised in the declaration
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_NO_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const SIGNED_WRITE = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

bitflags! {
    /// Access permissions enforced by the server
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u16 {
        const READ = 0x0001;
        const READ_ENCRYPTED = 0x0002;
        const WRITE = 0x0010;
        const WRITE_ENCRYPTED = 0x0020;
    }
}

/// How the central frames a characteristic write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteType {
    #[default]
    Default,
    NoResponse,
    Signed,
}

/// Status carried by GATT callbacks and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    ReadNotPermitted,
    WriteNotPermitted,
    RequestNotSupported,
    InvalidOffset,
    Failure,
    Other(u16),
}

impl GattStatus {
    pub fn is_success(&self) -> bool {
        *self == GattStatus::Success
    }
}

impl From<u16> for GattStatus {
    fn from(code: u16) -> Self {
        match code {
            GATT_SUCCESS => GattStatus::Success,
            GATT_READ_NOT_PERMITTED => GattStatus::ReadNotPermitted,
            GATT_WRITE_NOT_PERMITTED => GattStatus::WriteNotPermitted,
            GATT_REQUEST_NOT_SUPPORTED => GattStatus::RequestNotSupported,
            GATT_INVALID_OFFSET => GattStatus::InvalidOffset,
            GATT_FAILURE => GattStatus::Failure,
            other => GattStatus::Other(other),
        }
    }
}

impl From<GattStatus> for u16 {
    fn from(status: GattStatus) -> Self {
        match status {
            GattStatus::Success => GATT_SUCCESS,
            GattStatus::ReadNotPermitted => GATT_READ_NOT_PERMITTED,
            GattStatus::WriteNotPermitted => GATT_WRITE_NOT_PERMITTED,
            GattStatus::RequestNotSupported => GATT_REQUEST_NOT_SUPPORTED,
            GattStatus::InvalidOffset => GATT_INVALID_OFFSET,
            GattStatus::Failure => GATT_FAILURE,
            GattStatus::Other(code) => code,
        }
    }
}

/// Link state reported by connection-state callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A GATT descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub permissions: Permissions,
    pub value: Vec<u8>,
}

impl Descriptor {
    pub fn new(uuid: Uuid, permissions: Permissions, value: Vec<u8>) -> Self {
        Self {
            uuid,
            permissions,
            value,
        }
    }

    /// Whether this is a Client Characteristic Configuration descriptor,
    /// matched on the short id only.
    pub fn is_client_configuration(&self) -> bool {
        is_client_configuration_descriptor(&self.uuid)
    }
}

/// A GATT characteristic with its descriptors and current value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub permissions: Permissions,
    pub write_type: WriteType,
    pub value: Vec<u8>,
    pub descriptors: Vec<Descriptor>,
}

impl Characteristic {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties, permissions: Permissions) -> Self {
        Self {
            uuid,
            properties,
            permissions,
            write_type: WriteType::Default,
            value: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Indications need an acknowledgement from the peer, notifications do not
    pub fn requires_confirmation(&self) -> bool {
        self.properties.contains(CharacteristicProperties::INDICATE)
    }

    /// Any request on a characteristic without WRITE_NO_RESPONSE expects an answer
    pub fn requires_response(&self) -> bool {
        !self
            .properties
            .contains(CharacteristicProperties::WRITE_NO_RESPONSE)
    }

    pub fn is_readable(&self) -> bool {
        self.permissions.contains(Permissions::READ)
    }

    pub fn client_configuration_descriptor(&self) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.is_client_configuration())
    }
}

/// A GATT service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    pub is_primary: bool,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new_primary(uuid: Uuid) -> Self {
        Self {
            uuid,
            is_primary: true,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: Characteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    pub fn characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }

    pub fn characteristic_mut(&mut self, uuid: &Uuid) -> Option<&mut Characteristic> {
        self.characteristics.iter_mut().find(|c| c.uuid == *uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bdaddr_round_trip() {
        let addr: BdAddr = "00:11:22:AA:bb:FF".parse().unwrap();
        assert_eq!(addr, BdAddr::new([0x00, 0x11, 0x22, 0xAA, 0xBB, 0xFF]));
        assert_eq!(addr.to_string(), "00:11:22:AA:BB:FF");

        assert_eq!(
            "00:11:22".parse::<BdAddr>(),
            Err(BdAddrParseError::InvalidLength)
        );
        assert!("00:11:22:33:44:5".parse::<BdAddr>().is_err());
    }

    #[test]
    fn test_status_conversion() {
        assert_eq!(GattStatus::from(0), GattStatus::Success);
        assert_eq!(GattStatus::from(0x101), GattStatus::Failure);
        assert_eq!(GattStatus::from(0x85), GattStatus::Other(0x85));
        assert_eq!(u16::from(GattStatus::InvalidOffset), 0x07);
        assert!(GattStatus::Success.is_success());
        assert!(!GattStatus::Failure.is_success());
    }

    #[test]
    fn test_characteristic_flags() {
        let indicate = Characteristic::new(
            Uuid::from_u16(0x2A37),
            CharacteristicProperties::INDICATE | CharacteristicProperties::READ,
            Permissions::READ,
        );
        assert!(indicate.requires_confirmation());
        assert!(indicate.requires_response());
        assert!(indicate.is_readable());
        assert!(indicate.client_configuration_descriptor().is_none());

        let notify = Characteristic::new(
            Uuid::from_u16(0x2A38),
            CharacteristicProperties::NOTIFY | CharacteristicProperties::WRITE_NO_RESPONSE,
            Permissions::empty(),
        )
        .with_descriptor(Descriptor::new(
            Uuid::from_u16(0x2902),
            Permissions::READ | Permissions::WRITE,
            vec![0, 0],
        ));
        assert!(!notify.requires_confirmation());
        assert!(!notify.requires_response());
        assert!(!notify.is_readable());
        assert!(notify.client_configuration_descriptor().is_some());
    }
}
