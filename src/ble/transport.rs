//! Peripheral transport trait definitions and event types
//!
//! Defines the abstract peripheral interface that both the simulated
//! transport and the real BLE (btleplug) implementation conform to.
//!
//! The transport is callback-shaped: issue methods return quickly with
//! `Ok(())` (operation accepted) or `Err` (immediate stack rejection),
//! and the outcome arrives later as a [`LinkEvent`] on the channel the
//! link was opened with. Events for one run are delivered serially, in
//! issue order, on a single channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::gatt::{CharacteristicRef, ServiceCatalog};
use super::LinkError;

/// Connection-level state change reported by a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionChange {
    Connected,
    Disconnected,
}

/// Completion status of a GATT operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    Failure,
}

impl GattStatus {
    pub fn is_success(self) -> bool {
        self == GattStatus::Success
    }
}

/// Asynchronous events emitted by a [`PeripheralLink`].
#[derive(Debug, Clone)]
pub enum LinkEvent {
    ConnectionState(ConnectionChange),
    ServicesDiscovered {
        catalog: ServiceCatalog,
        status: GattStatus,
    },
    CharacteristicRead {
        characteristic: CharacteristicRef,
        value: Vec<u8>,
        status: GattStatus,
    },
    CharacteristicWrite {
        characteristic: CharacteristicRef,
        status: GattStatus,
    },
}

/// A connectable BLE peripheral (the device, not a live connection).
#[async_trait]
pub trait Peripheral: Send + Sync {
    /// Open a fresh link to the peripheral and begin connecting.
    ///
    /// Events for the returned link are delivered through `events` in
    /// issue order. The link is single-use: once disconnected and
    /// closed it is discarded, never reconnected.
    ///
    /// `Err` means the stack rejected the connect attempt outright;
    /// otherwise the attempt's outcome arrives as a
    /// [`LinkEvent::ConnectionState`].
    async fn connect_link(
        &self,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn PeripheralLink>, LinkError>;
}

/// A live link to a peripheral, owned by exactly one caller.
#[async_trait]
pub trait PeripheralLink: Send + Sync {
    /// Start service discovery. Completion arrives as
    /// [`LinkEvent::ServicesDiscovered`].
    async fn discover_services(&self) -> Result<(), LinkError>;

    /// Start reading a characteristic. Completion arrives as
    /// [`LinkEvent::CharacteristicRead`].
    async fn read_characteristic(
        &self,
        characteristic: &CharacteristicRef,
    ) -> Result<(), LinkError>;

    /// Start writing a characteristic. Completion arrives as
    /// [`LinkEvent::CharacteristicWrite`].
    async fn write_characteristic(
        &self,
        characteristic: &CharacteristicRef,
        value: &[u8],
    ) -> Result<(), LinkError>;

    /// Request an orderly disconnect. Fire-and-forget; the link reports
    /// [`ConnectionChange::Disconnected`] when the teardown completes.
    async fn disconnect(&self);

    /// Release the link. Fire-and-forget; no further events are emitted.
    async fn close(&self);
}
