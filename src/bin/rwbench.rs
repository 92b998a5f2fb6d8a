// src/bin/rwbench.rs
//! Command-line front end for the BLE read/write cycle benchmark.
//!
//! Runs against the in-process simulated peripheral (`--simulate`) or,
//! when built with `--features ble-central`, against a real peripheral
//! selected by advertised name prefix (`--device`).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;

use rwbench::ble::simulated::{SimPeripheral, SimProfile};
use rwbench::{BenchConfig, BenchOutcome, BenchRunner, Peripheral};

#[derive(Parser, Debug)]
#[command(name = "rwbench", about = "BLE connect/read/write cycle benchmark")]
struct Args {
    /// Run against the in-process simulated peripheral.
    #[arg(long)]
    simulate: bool,

    /// Advertised name prefix of the peripheral to benchmark
    /// (requires a build with --features ble-central).
    #[arg(long)]
    device: Option<String>,

    /// Total cycle budget.
    #[arg(long, default_value_t = 100)]
    cycles: u32,

    /// Quiescent interval between cycles, in milliseconds.
    #[arg(long, default_value_t = 50)]
    quiescent_ms: u64,

    /// Emit the final report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report {
    started_at: DateTime<Utc>,
    success: bool,
    read_count: Option<u32>,
    write_count: Option<u32>,
    elapsed_secs: Option<f64>,
    detail: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let peripheral: Arc<dyn Peripheral> = if args.simulate {
        Arc::new(SimPeripheral::new(SimProfile::standard()))
    } else if let Some(prefix) = args.device.as_deref() {
        select_device(prefix).await?
    } else {
        return Err("pass --simulate, or --device <name-prefix>".into());
    };

    let config = BenchConfig {
        cycle_budget: args.cycles,
        quiescent_interval: Duration::from_millis(args.quiescent_ms),
    };

    let started_at = Utc::now();
    let mut handle = BenchRunner::start(peripheral, config);

    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, cancelling run");
            canceller.cancel();
        }
    });

    // Stream the run log until the run winds down.
    while let Some(line) = handle.logs.recv().await {
        println!("{}", line);
    }
    let outcome = handle.finished().await;

    let report = match &outcome {
        BenchOutcome::Completed {
            read_count,
            write_count,
            elapsed,
        } => Report {
            started_at,
            success: true,
            read_count: Some(*read_count),
            write_count: Some(*write_count),
            elapsed_secs: Some(elapsed.as_millis() as f64 / 1000.0),
            detail: None,
        },
        BenchOutcome::Failed { error } => Report {
            started_at,
            success: false,
            read_count: None,
            write_count: None,
            elapsed_secs: None,
            detail: Some(error.to_string()),
        },
        BenchOutcome::Cancelled => Report {
            started_at,
            success: false,
            read_count: None,
            write_count: None,
            elapsed_secs: None,
            detail: Some("cancelled".to_string()),
        },
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.success {
        println!(
            "benchmark complete: reads={} writes={} elapsed={:.3}s",
            report.read_count.unwrap_or(0),
            report.write_count.unwrap_or(0),
            report.elapsed_secs.unwrap_or(0.0),
        );
    } else {
        println!(
            "benchmark did not complete: {}",
            report.detail.as_deref().unwrap_or("unknown"),
        );
    }

    if report.success {
        Ok(())
    } else {
        Err("benchmark did not complete".into())
    }
}

#[cfg(feature = "ble-central")]
async fn select_device(prefix: &str) -> Result<Arc<dyn Peripheral>, Box<dyn std::error::Error>> {
    let peripheral = rwbench::ble::central::BtPeripheral::find_by_name(prefix).await?;
    Ok(Arc::new(peripheral))
}

#[cfg(not(feature = "ble-central"))]
async fn select_device(_prefix: &str) -> Result<Arc<dyn Peripheral>, Box<dyn std::error::Error>> {
    Err("this build has no real BLE transport; rebuild with --features ble-central".into())
}
