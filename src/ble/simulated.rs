//! In-process simulated peripheral
//!
//! Provides a scripted peripheral that answers connects, discovery,
//! reads and writes entirely in-process. Used by the integration tests
//! so benchmark runs need no real BLE hardware.
//!
//! Completions are emitted from a spawned task, so the issue call
//! returns before its event is observable, as on a real stack. The
//! peripheral records every call it receives in order and counts
//! overlap violations (an operation issued while another completion is
//! still pending), which lets tests assert the one-outstanding-operation
//! invariant structurally.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::gatt::{
    alert_level, device_information_service, immediate_alert_service, manufacturer_name_string,
    CharacteristicRef, DiscoveredService, ServiceCatalog,
};
use super::transport::{ConnectionChange, GattStatus, LinkEvent, Peripheral, PeripheralLink};
use super::LinkError;

/// Behavior script for a simulated peripheral.
///
/// Failure injection indices are 1-based attempt counters across the
/// whole run, not per cycle: `fail_read_at: Some(5)` makes the fifth
/// read of the run report failure.
#[derive(Debug, Clone)]
pub struct SimProfile {
    /// Services reported by discovery.
    pub services: ServiceCatalog,
    /// Value of the Manufacturer Name String characteristic.
    pub manufacturer_name: String,
    /// Read attempt that reports `GattStatus::Failure`.
    pub fail_read_at: Option<u32>,
    /// Write attempt that reports `GattStatus::Failure`.
    pub fail_write_at: Option<u32>,
    /// Connect attempt that is rejected outright (issue call errors).
    pub reject_connect_at: Option<u32>,
}

impl SimProfile {
    /// A well-behaved peripheral exposing both benchmark targets.
    pub fn standard() -> Self {
        Self {
            services: ServiceCatalog {
                services: vec![
                    DiscoveredService::new(
                        device_information_service(),
                        &[manufacturer_name_string()],
                    ),
                    DiscoveredService::new(immediate_alert_service(), &[alert_level()]),
                ],
            },
            manufacturer_name: "SimWorks".to_string(),
            fail_read_at: None,
            fail_write_at: None,
            reject_connect_at: None,
        }
    }

    /// A peripheral exposing only the Device Information service.
    pub fn missing_alert_service() -> Self {
        Self {
            services: ServiceCatalog {
                services: vec![DiscoveredService::new(
                    device_information_service(),
                    &[manufacturer_name_string()],
                )],
            },
            ..Self::standard()
        }
    }
}

impl Default for SimProfile {
    fn default() -> Self {
        Self::standard()
    }
}

/// One call received by the simulated peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    Connect,
    DiscoverServices,
    Read(Uuid),
    Write(Uuid, Vec<u8>),
    Disconnect,
    Close,
}

struct SimShared {
    profile: SimProfile,
    calls: Mutex<Vec<SimCall>>,
    connect_attempts: AtomicU32,
    read_attempts: AtomicU32,
    write_attempts: AtomicU32,
    /// True while an issued operation's completion is still pending.
    in_flight: AtomicBool,
    overlap_violations: AtomicU32,
}

impl SimShared {
    fn record(&self, call: SimCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn begin_op(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlap_violations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Deliver `event` from a separate task: clear the in-flight marker,
/// then send. The order matters, since the caller may issue the next
/// operation as soon as it observes the event.
fn complete_op(
    shared: &Arc<SimShared>,
    events: &mpsc::UnboundedSender<LinkEvent>,
    event: LinkEvent,
) {
    let shared = Arc::clone(shared);
    let events = events.clone();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        shared.in_flight.store(false, Ordering::SeqCst);
        let _ = events.send(event);
    });
}

/// A scripted in-process peripheral.
pub struct SimPeripheral {
    shared: Arc<SimShared>,
}

impl SimPeripheral {
    pub fn new(profile: SimProfile) -> Self {
        Self {
            shared: Arc::new(SimShared {
                profile,
                calls: Mutex::new(Vec::new()),
                connect_attempts: AtomicU32::new(0),
                read_attempts: AtomicU32::new(0),
                write_attempts: AtomicU32::new(0),
                in_flight: AtomicBool::new(false),
                overlap_violations: AtomicU32::new(0),
            }),
        }
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<SimCall> {
        self.shared.calls.lock().unwrap().clone()
    }

    /// Calls matching `pred`, counted.
    pub fn count_calls(&self, pred: impl Fn(&SimCall) -> bool) -> usize {
        self.shared.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    /// Number of operations issued while another was still pending.
    pub fn overlap_violations(&self) -> u32 {
        self.shared.overlap_violations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Peripheral for SimPeripheral {
    async fn connect_link(
        &self,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn PeripheralLink>, LinkError> {
        self.shared.record(SimCall::Connect);
        let attempt = self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.shared.profile.reject_connect_at == Some(attempt) {
            return Err(LinkError::Rejected(format!(
                "connect attempt {} refused",
                attempt
            )));
        }

        self.shared.begin_op();
        complete_op(
            &self.shared,
            &events,
            LinkEvent::ConnectionState(ConnectionChange::Connected),
        );

        Ok(Box::new(SimLink {
            shared: Arc::clone(&self.shared),
            events,
            closed: AtomicBool::new(false),
        }))
    }
}

struct SimLink {
    shared: Arc<SimShared>,
    events: mpsc::UnboundedSender<LinkEvent>,
    closed: AtomicBool,
}

impl SimLink {
    fn ensure_open(&self) -> Result<(), LinkError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(LinkError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeripheralLink for SimLink {
    async fn discover_services(&self) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.shared.record(SimCall::DiscoverServices);
        self.shared.begin_op();
        complete_op(
            &self.shared,
            &self.events,
            LinkEvent::ServicesDiscovered {
                catalog: self.shared.profile.services.clone(),
                status: GattStatus::Success,
            },
        );
        Ok(())
    }

    async fn read_characteristic(
        &self,
        characteristic: &CharacteristicRef,
    ) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.shared.record(SimCall::Read(characteristic.uuid));
        let attempt = self.shared.read_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let (value, status) = if self.shared.profile.fail_read_at == Some(attempt) {
            (Vec::new(), GattStatus::Failure)
        } else if characteristic.uuid == manufacturer_name_string() {
            (
                self.shared.profile.manufacturer_name.clone().into_bytes(),
                GattStatus::Success,
            )
        } else {
            (Vec::new(), GattStatus::Success)
        };

        self.shared.begin_op();
        complete_op(
            &self.shared,
            &self.events,
            LinkEvent::CharacteristicRead {
                characteristic: characteristic.clone(),
                value,
                status,
            },
        );
        Ok(())
    }

    async fn write_characteristic(
        &self,
        characteristic: &CharacteristicRef,
        value: &[u8],
    ) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.shared
            .record(SimCall::Write(characteristic.uuid, value.to_vec()));
        let attempt = self.shared.write_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let status = if self.shared.profile.fail_write_at == Some(attempt) {
            GattStatus::Failure
        } else {
            GattStatus::Success
        };

        self.shared.begin_op();
        complete_op(
            &self.shared,
            &self.events,
            LinkEvent::CharacteristicWrite {
                characteristic: characteristic.clone(),
                status,
            },
        );
        Ok(())
    }

    async fn disconnect(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.shared.record(SimCall::Disconnect);
        self.shared.begin_op();
        complete_op(
            &self.shared,
            &self.events,
            LinkEvent::ConnectionState(ConnectionChange::Disconnected),
        );
    }

    async fn close(&self) {
        self.shared.record(SimCall::Close);
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(service: Uuid, uuid: Uuid) -> CharacteristicRef {
        CharacteristicRef { service, uuid }
    }

    #[tokio::test]
    async fn test_one_cycle_event_order() {
        let peripheral = SimPeripheral::new(SimProfile::standard());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let link = peripheral.connect_link(tx).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            LinkEvent::ConnectionState(ConnectionChange::Connected)
        ));

        link.discover_services().await.unwrap();
        let catalog = match rx.recv().await.unwrap() {
            LinkEvent::ServicesDiscovered { catalog, status } => {
                assert!(status.is_success());
                catalog
            }
            other => panic!("expected discovery event, got {:?}", other),
        };

        let name_ch = catalog
            .find_characteristic(device_information_service(), manufacturer_name_string())
            .unwrap();
        link.read_characteristic(&name_ch).await.unwrap();
        match rx.recv().await.unwrap() {
            LinkEvent::CharacteristicRead { value, status, .. } => {
                assert!(status.is_success());
                assert_eq!(value, b"SimWorks");
            }
            other => panic!("expected read event, got {:?}", other),
        }

        let alert_ch = catalog
            .find_characteristic(immediate_alert_service(), alert_level())
            .unwrap();
        link.write_characteristic(&alert_ch, &[1]).await.unwrap();
        match rx.recv().await.unwrap() {
            LinkEvent::CharacteristicWrite { status, .. } => assert!(status.is_success()),
            other => panic!("expected write event, got {:?}", other),
        }

        link.disconnect().await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            LinkEvent::ConnectionState(ConnectionChange::Disconnected)
        ));
        link.close().await;

        assert_eq!(peripheral.overlap_violations(), 0);
        let calls = peripheral.calls();
        assert_eq!(calls[0], SimCall::Connect);
        assert_eq!(calls[1], SimCall::DiscoverServices);
        assert_eq!(*calls.last().unwrap(), SimCall::Close);
    }

    #[tokio::test]
    async fn test_read_failure_injection() {
        let peripheral = SimPeripheral::new(SimProfile {
            fail_read_at: Some(1),
            ..SimProfile::standard()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let link = peripheral.connect_link(tx).await.unwrap();
        let _ = rx.recv().await.unwrap();

        let ch = target(device_information_service(), manufacturer_name_string());
        link.read_characteristic(&ch).await.unwrap();
        match rx.recv().await.unwrap() {
            LinkEvent::CharacteristicRead { status, value, .. } => {
                assert_eq!(status, GattStatus::Failure);
                assert!(value.is_empty());
            }
            other => panic!("expected read event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_rejection() {
        let peripheral = SimPeripheral::new(SimProfile {
            reject_connect_at: Some(2),
            ..SimProfile::standard()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        // First attempt is accepted.
        let link = peripheral.connect_link(tx.clone()).await.unwrap();
        let _ = rx.recv().await.unwrap();
        link.close().await;

        // Second attempt is rejected outright, with no event.
        let err = peripheral.connect_link(tx).await.err().unwrap();
        assert!(matches!(err, LinkError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_closed_link_rejects_operations() {
        let peripheral = SimPeripheral::new(SimProfile::standard());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let link = peripheral.connect_link(tx).await.unwrap();
        let _ = rx.recv().await.unwrap();
        link.close().await;

        let err = link.discover_services().await.err().unwrap();
        assert_eq!(err, LinkError::Closed);
    }

    #[tokio::test]
    async fn test_overlap_detection() {
        let peripheral = SimPeripheral::new(SimProfile::standard());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let link = peripheral.connect_link(tx).await.unwrap();
        let _ = rx.recv().await.unwrap();

        // Issue two operations without waiting for the first completion.
        let ch = target(device_information_service(), manufacturer_name_string());
        link.discover_services().await.unwrap();
        link.read_characteristic(&ch).await.unwrap();
        assert_eq!(peripheral.overlap_violations(), 1);

        let _ = rx.recv().await.unwrap();
        let _ = rx.recv().await.unwrap();
    }
}
