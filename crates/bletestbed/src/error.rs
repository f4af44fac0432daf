//! Error types for the bletestbed library
//!
//! This module defines the error types returned by operations a caller
//! invokes directly on a session manager. Callback handlers never return
//! errors; they log and move the session to the appropriate state.

use crate::uuid::Uuid;
use thiserror::Error;

/// Errors that can occur while driving a GATT session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Device not connected")]
    NotConnected,

    #[error("Session not ready: {0}")]
    NotReady(&'static str),

    #[error("GATT server is not running")]
    ServerNotRunning,

    #[error("Service not found")]
    ServiceNotFound,

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Message payload is empty")]
    EmptyMessage,

    #[error("Adapter refused to initiate {0}")]
    NotInitiated(&'static str),

    #[error("Adapter error: {0}")]
    Adapter(String),
}

/// Result type used throughout the library
pub type GattResult<T> = Result<T, GattError>;
