//! Cycle boundary bookkeeping
//!
//! Accumulates lap instants: entry 0 is the run's start, each later
//! entry is the instant a disconnect event completed a cycle. The
//! reported lap metric is cumulative from the run's start, not a
//! per-cycle delta.

use std::time::Duration;

use tokio::time::Instant;

/// Ordered lap instants for one benchmark run.
#[derive(Debug, Default)]
pub struct CycleRecorder {
    laps: Vec<Instant>,
}

impl CycleRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset and record the run's start instant as entry 0.
    pub fn record_start(&mut self, instant: Instant) {
        self.laps.clear();
        self.laps.push(instant);
    }

    /// Append a cycle boundary. Pure accumulation, no validation.
    pub fn record_cycle_boundary(&mut self, instant: Instant) {
        self.laps.push(instant);
    }

    /// Completed cycles: one fewer than the number of recorded instants.
    pub fn cycle_count(&self) -> u32 {
        self.laps.len().saturating_sub(1) as u32
    }

    /// Elapsed time from the run's start to the latest boundary.
    pub fn cumulative_elapsed(&self) -> Duration {
        match (self.laps.first(), self.laps.last()) {
            (Some(first), Some(last)) => last.duration_since(*first),
            _ => Duration::ZERO,
        }
    }

    /// Cumulative elapsed time as fractional seconds at millisecond
    /// precision, for the lap log line.
    pub fn cumulative_seconds(&self) -> f64 {
        self.cumulative_elapsed().as_millis() as f64 / 1000.0
    }

    /// The recorded instants, oldest first.
    pub fn laps(&self) -> &[Instant] {
        &self.laps
    }
}
