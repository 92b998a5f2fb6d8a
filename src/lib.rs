// rwbench - BLE connect/read/write cycle benchmark

pub mod bench;
pub mod ble;

pub use bench::machine::{BenchHandle, BenchRunner};
pub use bench::{BenchConfig, BenchError, BenchOutcome, BenchState};
pub use ble::transport::{Peripheral, PeripheralLink};
pub use ble::LinkError;
