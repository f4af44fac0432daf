//! GATT (Generic Attribute Profile) session layer
//!
//! Two event-driven session managers over a platform adapter: the peripheral
//! [`GattServer`] exposing the echo service and the central [`GattClient`]
//! that subscribes to it.

mod activity;
pub mod adapter;
pub mod client;
pub mod constants;
pub mod server;
pub mod types;


pub use activity::LogCallback;
pub use adapter::{
    AdvertiseMode, AdvertiseSettings, CentralAdapter, ClientEvent, ConnectionHandle,
    PeripheralAdapter, ScanFilter, ScanMode, ServerEvent, ServerHandle, TxPowerLevel,
};
pub use client::{GattClient, GattClientConfig, MessageCallback, SessionState};
pub use server::{GattServer, GattServerConfig};
pub use types::{
    BdAddr, Characteristic, CharacteristicProperties, ConnectionState, Descriptor, Device,
    GattStatus, Permissions, Service, WriteType,
};
