//! Benchmark run layer
//!
//! The state machine that drives a peripheral through repeated
//! connect → discover → read → write → disconnect cycles, the cycle
//! recorder, and the run-level error taxonomy.

pub mod machine;
pub mod recorder;

use std::time::Duration;

use thiserror::Error;

use crate::ble::LinkError;

/// Errors that terminate a benchmark run.
///
/// All of these are fatal at the run level; there is no per-operation
/// retry. The only retry mechanism is the unconditional new cycle after
/// a clean disconnect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BenchError {
    /// The issue call itself was refused by the stack.
    #[error("transport rejected {operation}: {source}")]
    TransportRejected {
        operation: &'static str,
        #[source]
        source: LinkError,
    },

    /// An asynchronous event reported a non-success status.
    #[error("{operation} reported failure")]
    OperationFailed { operation: &'static str },

    /// An event arrived with no matching outstanding operation, or the
    /// link was unexpectedly absent. Logged at error level, distinctly
    /// from ordinary operation failure.
    #[error("state invariant violated: {0}")]
    InvariantViolation(String),
}

/// Connection state of a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchState {
    Idle,
    Connecting,
    Connected,
    DiscoveringServices,
    ReadingManufacturer,
    WritingAlert,
    Disconnecting,
    Disconnected,
}

/// Run parameters.
#[derive(Debug, Clone, Copy)]
pub struct BenchConfig {
    /// Total cycle budget. The run completes successfully once the
    /// completed cycle count exceeds this, i.e. the default of 100
    /// finishes at the 101st disconnect event.
    pub cycle_budget: u32,
    /// Quiescent interval between a cycle's disconnect and the next
    /// connect, debouncing stack races.
    pub quiescent_interval: Duration,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            cycle_budget: 100,
            quiescent_interval: Duration::from_millis(50),
        }
    }
}

/// Terminal outcome of a run, reported exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BenchOutcome {
    /// The cycle budget was exhausted: the designed success path.
    Completed {
        read_count: u32,
        write_count: u32,
        elapsed: Duration,
    },
    /// A transport rejection, operation failure, or invariant violation
    /// ended the run early.
    Failed { error: BenchError },
    /// The run was cancelled by the caller.
    Cancelled,
}

impl BenchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BenchOutcome::Completed { .. })
    }
}
