//! GATT identity registry
//!
//! The fixed UUIDs of the echo service and the rules for recognising its
//! attributes in a discovered attribute tree. Matching is done on the
//! canonical string form, case-insensitively, so that trees produced by any
//! platform stack compare equal.

use std::time::Duration;

use crate::codec::{short_uuid_matches, uuid_matches};
use crate::gatt::types::{
    Characteristic, CharacteristicProperties, Descriptor, Permissions, Service,
};
use crate::uuid::Uuid;

pub const SERVICE_STRING: &str = "7D2EA28A-F7BD-485A-BD9D-92AD6ECFE93E";
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x7D2EA28A_F7BD_485A_BD9D_92AD6ECFE93E);

pub const CHARACTERISTIC_ECHO_STRING: &str = "7D2EBAAD-F7BD-485A-BD9D-92AD6ECFE93E";
pub const CHARACTERISTIC_ECHO_UUID: Uuid = Uuid::from_u128(0x7D2EBAAD_F7BD_485A_BD9D_92AD6ECFE93E);

pub const CHARACTERISTIC_TIME_STRING: &str = "7D2EDEAD-F7BD-485A-BD9D-92AD6ECFE93E";
pub const CHARACTERISTIC_TIME_UUID: Uuid = Uuid::from_u128(0x7D2EDEAD_F7BD_485A_BD9D_92AD6ECFE93E);

pub const CLIENT_CONFIGURATION_DESCRIPTOR_STRING: &str = "00002902-0000-1000-8000-00805f9b34fb";
pub const CLIENT_CONFIGURATION_DESCRIPTOR_UUID: Uuid = Uuid::from_u16(0x2902);
pub const CLIENT_CONFIGURATION_DESCRIPTOR_SHORT_ID: &str = "2902";

pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Length of one scan window
pub const SCAN_PERIOD: Duration = Duration::from_millis(5000);

pub fn is_echo_characteristic(uuid: &Uuid) -> bool {
    uuid_matches(&uuid.to_string(), &[CHARACTERISTIC_ECHO_STRING])
}

pub fn is_time_characteristic(uuid: &Uuid) -> bool {
    uuid_matches(&uuid.to_string(), &[CHARACTERISTIC_TIME_STRING])
}

/// Either of the two characteristics a session subscribes to
pub fn is_matching_characteristic(uuid: &Uuid) -> bool {
    uuid_matches(
        &uuid.to_string(),
        &[CHARACTERISTIC_ECHO_STRING, CHARACTERISTIC_TIME_STRING],
    )
}

pub fn is_client_configuration_descriptor(uuid: &Uuid) -> bool {
    short_uuid_matches(&uuid.to_string(), &[CLIENT_CONFIGURATION_DESCRIPTOR_SHORT_ID])
}

pub fn find_service(services: &[Service]) -> Option<&Service> {
    services
        .iter()
        .find(|s| uuid_matches(&s.uuid.to_string(), &[SERVICE_STRING]))
}

fn find_service_mut(services: &mut [Service]) -> Option<&mut Service> {
    services
        .iter_mut()
        .find(|s| uuid_matches(&s.uuid.to_string(), &[SERVICE_STRING]))
}

/// All echo/time characteristics of the echo service, in discovery order
pub fn find_characteristics(services: &[Service]) -> Vec<&Characteristic> {
    find_service(services)
        .map(|service| {
            service
                .characteristics
                .iter()
                .filter(|c| is_matching_characteristic(&c.uuid))
                .collect()
        })
        .unwrap_or_default()
}

/// Same as [`find_characteristics`], mutably, for setting write types
pub fn find_characteristics_mut(services: &mut [Service]) -> Vec<&mut Characteristic> {
    find_service_mut(services)
        .map(|service| {
            service
                .characteristics
                .iter_mut()
                .filter(|c| is_matching_characteristic(&c.uuid))
                .collect()
        })
        .unwrap_or_default()
}

/// Build the echo service tree exposed by the peripheral.
///
/// The echo characteristic is write-only and has no configuration
/// descriptor, so every connected peer receives its notifications. The time
/// characteristic notifies through a configuration descriptor and is only
/// readable when `time_readable` is set.
pub fn echo_service(time_readable: bool) -> Service {
    let echo = Characteristic::new(
        CHARACTERISTIC_ECHO_UUID,
        CharacteristicProperties::WRITE,
        Permissions::WRITE,
    );

    let (time_properties, time_permissions) = if time_readable {
        (
            CharacteristicProperties::NOTIFY | CharacteristicProperties::READ,
            Permissions::READ,
        )
    } else {
        (CharacteristicProperties::NOTIFY, Permissions::empty())
    };
    let time = Characteristic::new(CHARACTERISTIC_TIME_UUID, time_properties, time_permissions)
        .with_descriptor(Descriptor::new(
            CLIENT_CONFIGURATION_DESCRIPTOR_UUID,
            Permissions::READ | Permissions::WRITE,
            DISABLE_NOTIFICATION_VALUE.to_vec(),
        ));

    Service::new_primary(SERVICE_UUID)
        .with_characteristic(echo)
        .with_characteristic(time)
}
