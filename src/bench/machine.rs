//! Benchmark state machine
//!
//! Drives a peripheral through repeated connect → discover → read →
//! write → disconnect cycles until the cycle budget is exhausted or a
//! failure ends the run.
//!
//! Every transport callback is reframed as a [`LinkEvent`] delivered to
//! a single-consumer transition function keyed on the current state, so
//! at most one transport operation is ever outstanding and the
//! one-operation invariant is enforced structurally rather than by
//! convention. Each cycle gets a fresh link; the previous one is closed
//! at the cycle boundary and never reused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;

use crate::ble::gatt::{self, CharacteristicRef, ServiceCatalog};
use crate::ble::transport::{ConnectionChange, GattStatus, LinkEvent, Peripheral, PeripheralLink};
use crate::ble::LinkError;

use super::recorder::CycleRecorder;
use super::{BenchConfig, BenchError, BenchOutcome, BenchState};

/// Cooperative cancellation: a latched flag plus a wakeup.
struct CancelToken {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Latch the token. Only the first call wakes the run loop.
    fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// What the transition function decided.
enum Transition {
    /// Wait for the next event.
    Stay,
    /// Cycle complete: close out, pause the quiescent interval, reconnect.
    NextCycle,
    /// The run is over.
    Finished(BenchOutcome),
}

/// Handle to a running benchmark.
///
/// One handle exists per run; a second `start` call builds a new,
/// independent run, so re-entry into a live run is impossible by
/// construction. Dropping the handle cancels the run and tears the
/// transport down best-effort.
pub struct BenchHandle {
    /// Append-only, ordered run log (the presentation stream).
    pub logs: mpsc::UnboundedReceiver<String>,
    cancel: Arc<CancelToken>,
    state_rx: watch::Receiver<BenchState>,
    outcome_rx: watch::Receiver<Option<BenchOutcome>>,
    task: tokio::task::JoinHandle<()>,
}

impl BenchHandle {
    /// Current connection state of the run.
    pub fn state(&self) -> BenchState {
        *self.state_rx.borrow()
    }

    /// The terminal outcome, if the run has already finished.
    pub fn outcome(&self) -> Option<BenchOutcome> {
        self.outcome_rx.borrow().clone()
    }

    /// Wait for the terminal outcome. May be called repeatedly; every
    /// call returns the same value.
    pub async fn finished(&mut self) -> BenchOutcome {
        match self.outcome_rx.wait_for(|o| o.is_some()).await {
            Ok(outcome) => outcome.clone().unwrap_or(BenchOutcome::Cancelled),
            // The run task went away without reporting (e.g. panicked).
            Err(_) => BenchOutcome::Cancelled,
        }
    }

    /// Cancel the run: best-effort disconnect + close, one terminal
    /// report. Idempotent, safe from any state and concurrently with
    /// in-flight transport events.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A cancellation trigger usable from other tasks.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            token: Arc::clone(&self.cancel),
        }
    }

    /// Wait for the outcome and for the run task to fully wind down.
    pub async fn join(mut self) -> BenchOutcome {
        let outcome = self.finished().await;
        let _ = (&mut self.task).await;
        outcome
    }
}

impl Drop for BenchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A clonable cancellation trigger detached from the handle, for
/// signal handlers and other tasks that cannot borrow it.
#[derive(Clone)]
pub struct Canceller {
    token: Arc<CancelToken>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// The benchmark state machine. Owns the run state exclusively; all
/// mutation happens on its event loop.
pub struct BenchRunner {
    peripheral: Arc<dyn Peripheral>,
    config: BenchConfig,
    state: BenchState,
    recorder: CycleRecorder,
    read_count: u32,
    write_count: u32,
    /// Valid between a successful discovery and the next disconnect.
    manufacturer_ch: Option<CharacteristicRef>,
    alert_ch: Option<CharacteristicRef>,
    /// The current cycle's link, if any. Single-use.
    link: Option<Box<dyn PeripheralLink>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    state_tx: watch::Sender<BenchState>,
    log_tx: mpsc::UnboundedSender<String>,
    cancel: Arc<CancelToken>,
}

impl BenchRunner {
    /// Start a benchmark run against `peripheral`.
    ///
    /// Resets the run state, records the start instant as the first lap
    /// entry, and issues the first connect. The run proceeds on a
    /// spawned task; observe it through the returned handle.
    pub fn start(peripheral: Arc<dyn Peripheral>, config: BenchConfig) -> BenchHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(BenchState::Idle);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let cancel = Arc::new(CancelToken::new());

        let runner = BenchRunner {
            peripheral,
            config,
            state: BenchState::Idle,
            recorder: CycleRecorder::new(),
            read_count: 0,
            write_count: 0,
            manufacturer_ch: None,
            alert_ch: None,
            link: None,
            events_tx,
            events_rx,
            state_tx,
            log_tx,
            cancel: Arc::clone(&cancel),
        };

        let task = tokio::spawn(async move {
            let outcome = runner.run().await;
            let _ = outcome_tx.send(Some(outcome));
        });

        BenchHandle {
            logs: log_rx,
            cancel,
            state_rx,
            outcome_rx,
            task,
        }
    }

    async fn run(mut self) -> BenchOutcome {
        self.emit("start".to_string());
        self.recorder.record_start(Instant::now());
        if let Err(error) = self.issue_connect().await {
            return self.fail(error);
        }

        let cancel = Arc::clone(&self.cancel);
        loop {
            if cancel.is_cancelled() {
                return self.cancelled_teardown().await;
            }
            let event = tokio::select! {
                _ = cancel.cancelled() => return self.cancelled_teardown().await,
                event = self.events_rx.recv() => event,
            };
            let Some(event) = event else {
                return self.fail(BenchError::InvariantViolation(
                    "event channel closed".to_string(),
                ));
            };
            match self.handle_event(event).await {
                Ok(Transition::Stay) => {}
                Ok(Transition::NextCycle) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return self.cancelled_teardown().await,
                        _ = tokio::time::sleep(self.config.quiescent_interval) => {}
                    }
                    if let Err(error) = self.issue_connect().await {
                        return self.fail(error);
                    }
                }
                Ok(Transition::Finished(outcome)) => return outcome,
                Err(error) => return self.fail(error),
            }
        }
    }

    /// The transition function: one event in, one decision out.
    async fn handle_event(&mut self, event: LinkEvent) -> Result<Transition, BenchError> {
        match event {
            LinkEvent::ConnectionState(ConnectionChange::Connected) => self.on_connected().await,
            LinkEvent::ConnectionState(ConnectionChange::Disconnected) => {
                self.on_disconnected().await
            }
            LinkEvent::ServicesDiscovered { catalog, status } => {
                self.on_services_discovered(catalog, status).await
            }
            LinkEvent::CharacteristicRead {
                characteristic,
                value,
                status,
            } => self.on_characteristic_read(characteristic, value, status).await,
            LinkEvent::CharacteristicWrite {
                characteristic,
                status,
            } => self.on_characteristic_write(characteristic, status).await,
        }
    }

    async fn on_connected(&mut self) -> Result<Transition, BenchError> {
        if self.state != BenchState::Connecting && self.state != BenchState::Disconnected {
            return Err(self.invariant(format!("connected event in state {:?}", self.state)));
        }
        self.emit("Connected".to_string());
        self.set_state(BenchState::Connected);

        let issue = match self.link.as_ref() {
            Some(link) => link.discover_services().await,
            None => {
                return Err(self.invariant("link absent while issuing discoverServices".into()))
            }
        };
        if let Err(source) = issue {
            return Err(self.reject("discoverServices", source));
        }
        self.set_state(BenchState::DiscoveringServices);
        Ok(Transition::Stay)
    }

    /// A disconnect completes a cycle from any active state. On real
    /// stacks it also ends a dropped connection mid-cycle, and the
    /// cycle-level retry applies to that too.
    async fn on_disconnected(&mut self) -> Result<Transition, BenchError> {
        self.emit("Disconnected".to_string());
        self.recorder.record_cycle_boundary(Instant::now());
        let lap = self.recorder.cycle_count();
        // Deliberately cumulative from the run's start, not a per-cycle
        // delta.
        self.emit(format!("lap {}: {:10.3}", lap, self.recorder.cumulative_seconds()));
        self.set_state(BenchState::Disconnected);

        if lap > self.config.cycle_budget {
            self.emit(format!(
                "Finished: ReadCount:{} WriteCount:{}",
                self.read_count, self.write_count
            ));
            return Ok(Transition::Finished(BenchOutcome::Completed {
                read_count: self.read_count,
                write_count: self.write_count,
                elapsed: self.recorder.cumulative_elapsed(),
            }));
        }

        // Close out the cycle: the refs die with the link, which is
        // single-use and replaced on the next connect.
        self.manufacturer_ch = None;
        self.alert_ch = None;
        if let Some(link) = self.link.take() {
            link.close().await;
        }
        Ok(Transition::NextCycle)
    }

    async fn on_services_discovered(
        &mut self,
        catalog: ServiceCatalog,
        status: GattStatus,
    ) -> Result<Transition, BenchError> {
        if self.state != BenchState::DiscoveringServices {
            return Err(self.invariant(format!("discovery event in state {:?}", self.state)));
        }
        self.emit("Services Discovered".to_string());
        if !status.is_success() {
            self.emit("Service discovery failed".to_string());
            return Err(BenchError::OperationFailed {
                operation: "discoverServices",
            });
        }

        self.manufacturer_ch = catalog.find_characteristic(
            gatt::device_information_service(),
            gatt::manufacturer_name_string(),
        );
        self.alert_ch =
            catalog.find_characteristic(gatt::immediate_alert_service(), gatt::alert_level());

        let manufacturer = match (&self.manufacturer_ch, &self.alert_ch) {
            (Some(manufacturer), Some(_)) => manufacturer.clone(),
            // Known quiet stall: with fewer than both targets present
            // the cycle goes no further and the run stays Connected,
            // neither failing nor timing out.
            _ => {
                self.set_state(BenchState::Connected);
                return Ok(Transition::Stay);
            }
        };

        let issue = match self.link.as_ref() {
            Some(link) => link.read_characteristic(&manufacturer).await,
            None => {
                return Err(self.invariant("link absent while issuing readCharacteristic".into()))
            }
        };
        if let Err(source) = issue {
            return Err(self.reject("readCharacteristic", source));
        }
        self.set_state(BenchState::ReadingManufacturer);
        Ok(Transition::Stay)
    }

    async fn on_characteristic_read(
        &mut self,
        characteristic: CharacteristicRef,
        value: Vec<u8>,
        status: GattStatus,
    ) -> Result<Transition, BenchError> {
        if self.state != BenchState::ReadingManufacturer {
            return Err(self.invariant(format!("read event in state {:?}", self.state)));
        }
        if !status.is_success() {
            self.emit("Read Failed".to_string());
            return Err(BenchError::OperationFailed {
                operation: "readCharacteristic",
            });
        }
        self.emit("Read Succeeded".to_string());
        self.read_count += 1;

        // A completion for any characteristic other than the
        // manufacturer target leaves the cycle where it is.
        if characteristic.uuid != gatt::manufacturer_name_string() {
            return Ok(Transition::Stay);
        }
        log::debug!("read manufacturer name={}", String::from_utf8_lossy(&value));

        let alert = match self.alert_ch.clone() {
            Some(alert) => alert,
            None => {
                return Err(
                    self.invariant("alert target absent while issuing writeCharacteristic".into())
                )
            }
        };
        // Stamp the payload with the running read count, truncated to a
        // single byte.
        let payload = [self.read_count as u8];
        let issue = match self.link.as_ref() {
            Some(link) => link.write_characteristic(&alert, &payload).await,
            None => {
                return Err(self.invariant("link absent while issuing writeCharacteristic".into()))
            }
        };
        if let Err(source) = issue {
            return Err(self.reject("writeCharacteristic", source));
        }
        self.set_state(BenchState::WritingAlert);
        Ok(Transition::Stay)
    }

    async fn on_characteristic_write(
        &mut self,
        _characteristic: CharacteristicRef,
        status: GattStatus,
    ) -> Result<Transition, BenchError> {
        if self.state != BenchState::WritingAlert {
            return Err(self.invariant(format!("write event in state {:?}", self.state)));
        }
        if !status.is_success() {
            self.emit("Write Failed".to_string());
            return Err(BenchError::OperationFailed {
                operation: "writeCharacteristic",
            });
        }
        self.emit("Write Succeeded".to_string());
        self.write_count += 1;

        match self.link.as_ref() {
            Some(link) => link.disconnect().await,
            None => return Err(self.invariant("link absent while issuing disconnect".into())),
        }
        self.set_state(BenchState::Disconnecting);
        Ok(Transition::Stay)
    }

    /// Open a fresh link and begin connecting. Requires that no link is
    /// currently held.
    async fn issue_connect(&mut self) -> Result<(), BenchError> {
        if self.link.is_some() {
            return Err(self.invariant("connect issued while a link is still held".into()));
        }
        match self.peripheral.connect_link(self.events_tx.clone()).await {
            Ok(link) => {
                self.link = Some(link);
                self.set_state(BenchState::Connecting);
                Ok(())
            }
            Err(source) => Err(self.reject("connect", source)),
        }
    }

    async fn cancelled_teardown(&mut self) -> BenchOutcome {
        if let Some(link) = self.link.take() {
            link.disconnect().await;
            link.close().await;
        }
        self.emit("cancelled".to_string());
        BenchOutcome::Cancelled
    }

    fn set_state(&mut self, state: BenchState) {
        if self.state != state {
            log::debug!("state {:?} -> {:?}", self.state, state);
            self.emit(format!("-> {:?}", state));
            self.state = state;
            let _ = self.state_tx.send(state);
        }
    }

    fn emit(&self, line: String) {
        log::info!("{}", line);
        let _ = self.log_tx.send(line);
    }

    fn reject(&mut self, operation: &'static str, source: LinkError) -> BenchError {
        self.emit(format!("{} rejected: {}", operation, source));
        BenchError::TransportRejected { operation, source }
    }

    fn invariant(&mut self, detail: String) -> BenchError {
        log::error!("state error: {}", detail);
        self.emit(format!("state error: {}", detail));
        BenchError::InvariantViolation(detail)
    }

    fn fail(&mut self, error: BenchError) -> BenchOutcome {
        self.emit(format!("Error occurred: {}", error));
        BenchOutcome::Failed { error }
    }
}
