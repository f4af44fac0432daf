//! bletestbed - A Bluetooth LE GATT echo testbed
//!
//! This library implements both ends of a small GATT protocol: a peripheral
//! that advertises an echo service and pushes echo and time values to
//! subscribed centrals, and a central that scans, connects, completes the
//! notification handshake and exchanges messages. The radio itself is
//! abstracted behind adapter traits; an in-memory [`loopback`] radio connects
//! the two roles inside one process.

pub mod codec;
pub mod error;
pub mod gatt;
pub mod loopback;
pub mod queue;
pub mod registry;
pub mod scan;
pub mod uuid;

// Re-export common types for convenience
pub use error::{GattError, GattResult};
pub use gatt::{
    BdAddr, CentralAdapter, Characteristic, ClientEvent, Device, GattClient, GattClientConfig,
    GattServer, GattServerConfig, GattStatus, PeripheralAdapter, ServerEvent, Service,
    SessionState,
};
pub use loopback::LoopbackRadio;
pub use uuid::Uuid;
