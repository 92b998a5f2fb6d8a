//! Real BLE central transport backed by `btleplug`
//!
//! Adapts a `btleplug` platform peripheral to the [`Peripheral`] /
//! [`PeripheralLink`] boundary. Each completion-style btleplug call is
//! issued from a spawned task and reported back as a [`LinkEvent`], so
//! the benchmark sees the same callback-shaped surface as the simulated
//! transport.
//!
//! A failed async connect is reported as a `Disconnected` event rather
//! than a distinct error, matching the Android callback surface the
//! benchmark was modeled on; the state machine then runs its normal
//! cycle-boundary path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Manager, Peripheral as PlatformPeripheral};
use tokio::sync::mpsc;

use super::gatt::{CharacteristicRef, DiscoveredService, ServiceCatalog};
use super::transport::{ConnectionChange, GattStatus, LinkEvent, Peripheral, PeripheralLink};
use super::LinkError;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A connectable peripheral discovered via btleplug.
pub struct BtPeripheral {
    device: PlatformPeripheral,
}

impl BtPeripheral {
    pub fn new(device: PlatformPeripheral) -> Self {
        Self { device }
    }

    /// Scan every adapter until a peripheral whose advertised name
    /// starts with `prefix` appears, then stop scanning and return it.
    pub async fn find_by_name(prefix: &str) -> Result<Self, LinkError> {
        let manager = Manager::new().await.map_err(connection_error)?;
        let adapters = manager.adapters().await.map_err(connection_error)?;
        if adapters.is_empty() {
            return Err(LinkError::ConnectionError("no BLE adapters found".into()));
        }

        for adapter in &adapters {
            adapter
                .start_scan(ScanFilter::default())
                .await
                .map_err(connection_error)?;
        }
        log::info!("scanning for peripheral with name prefix {:?}", prefix);

        loop {
            for adapter in &adapters {
                for device in adapter.peripherals().await.map_err(connection_error)? {
                    let Some(properties) = device.properties().await.map_err(connection_error)?
                    else {
                        continue;
                    };
                    let matches = properties
                        .local_name
                        .as_deref()
                        .map_or(false, |name| name.starts_with(prefix));
                    if matches {
                        for adapter in &adapters {
                            let _ = adapter.stop_scan().await;
                        }
                        log::info!("found peripheral {:?}", properties.local_name);
                        return Ok(Self::new(device));
                    }
                }
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    }
}

fn connection_error(err: btleplug::Error) -> LinkError {
    LinkError::ConnectionError(err.to_string())
}

#[async_trait]
impl Peripheral for BtPeripheral {
    async fn connect_link(
        &self,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn PeripheralLink>, LinkError> {
        let device = self.device.clone();
        let tx = events.clone();
        tokio::spawn(async move {
            match device.connect().await {
                Ok(()) => {
                    let _ = tx.send(LinkEvent::ConnectionState(ConnectionChange::Connected));
                }
                Err(err) => {
                    log::warn!("connect failed: {}", err);
                    let _ = tx.send(LinkEvent::ConnectionState(ConnectionChange::Disconnected));
                }
            }
        });

        Ok(Box::new(BtLink {
            device: self.device.clone(),
            events,
            closed: AtomicBool::new(false),
        }))
    }
}

struct BtLink {
    device: PlatformPeripheral,
    events: mpsc::UnboundedSender<LinkEvent>,
    closed: AtomicBool,
}

impl BtLink {
    fn ensure_open(&self) -> Result<(), LinkError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(LinkError::Closed)
        } else {
            Ok(())
        }
    }

    /// Resolve a catalog reference back to the btleplug characteristic.
    fn lookup(&self, reference: &CharacteristicRef) -> Result<Characteristic, LinkError> {
        self.device
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == reference.uuid && c.service_uuid == reference.service)
            .ok_or_else(|| {
                LinkError::GattError(format!("characteristic {} not discovered", reference.uuid))
            })
    }
}

fn catalog_from(device: &PlatformPeripheral) -> ServiceCatalog {
    ServiceCatalog {
        services: device
            .services()
            .into_iter()
            .map(|service| {
                let service_uuid = service.uuid;
                DiscoveredService {
                    uuid: service_uuid,
                    characteristics: service
                        .characteristics
                        .into_iter()
                        .map(|c| CharacteristicRef {
                            service: service_uuid,
                            uuid: c.uuid,
                        })
                        .collect(),
                }
            })
            .collect(),
    }
}

#[async_trait]
impl PeripheralLink for BtLink {
    async fn discover_services(&self) -> Result<(), LinkError> {
        self.ensure_open()?;
        let device = self.device.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match device.discover_services().await {
                Ok(()) => {
                    let _ = events.send(LinkEvent::ServicesDiscovered {
                        catalog: catalog_from(&device),
                        status: GattStatus::Success,
                    });
                }
                Err(err) => {
                    log::warn!("service discovery failed: {}", err);
                    let _ = events.send(LinkEvent::ServicesDiscovered {
                        catalog: ServiceCatalog::default(),
                        status: GattStatus::Failure,
                    });
                }
            }
        });
        Ok(())
    }

    async fn read_characteristic(
        &self,
        characteristic: &CharacteristicRef,
    ) -> Result<(), LinkError> {
        self.ensure_open()?;
        let target = self.lookup(characteristic)?;
        let device = self.device.clone();
        let events = self.events.clone();
        let reference = characteristic.clone();
        tokio::spawn(async move {
            match device.read(&target).await {
                Ok(value) => {
                    let _ = events.send(LinkEvent::CharacteristicRead {
                        characteristic: reference,
                        value,
                        status: GattStatus::Success,
                    });
                }
                Err(err) => {
                    log::warn!("read failed: {}", err);
                    let _ = events.send(LinkEvent::CharacteristicRead {
                        characteristic: reference,
                        value: Vec::new(),
                        status: GattStatus::Failure,
                    });
                }
            }
        });
        Ok(())
    }

    async fn write_characteristic(
        &self,
        characteristic: &CharacteristicRef,
        value: &[u8],
    ) -> Result<(), LinkError> {
        self.ensure_open()?;
        let target = self.lookup(characteristic)?;
        let device = self.device.clone();
        let events = self.events.clone();
        let reference = characteristic.clone();
        let payload = value.to_vec();
        tokio::spawn(async move {
            // The reference implementation observed write status
            // callbacks, so writes go out with-response.
            match device.write(&target, &payload, WriteType::WithResponse).await {
                Ok(()) => {
                    let _ = events.send(LinkEvent::CharacteristicWrite {
                        characteristic: reference,
                        status: GattStatus::Success,
                    });
                }
                Err(err) => {
                    log::warn!("write failed: {}", err);
                    let _ = events.send(LinkEvent::CharacteristicWrite {
                        characteristic: reference,
                        status: GattStatus::Failure,
                    });
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self) {
        let device = self.device.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(err) = device.disconnect().await {
                log::warn!("disconnect failed: {}", err);
            }
            let _ = events.send(LinkEvent::ConnectionState(ConnectionChange::Disconnected));
        });
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
