//! BLE transport layer for the benchmark
//!
//! Provides the abstract peripheral traits, the well-known GATT
//! identifiers, a simulated transport for testing, and (behind the
//! `ble-central` feature) a btleplug-backed real transport.

#[cfg(feature = "ble-central")]
pub mod central;
pub mod gatt;
pub mod simulated;
pub mod transport;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("GATT error: {0}")]
    GattError(String),

    #[error("Operation rejected by the stack: {0}")]
    Rejected(String),

    #[error("Link closed")]
    Closed,
}
