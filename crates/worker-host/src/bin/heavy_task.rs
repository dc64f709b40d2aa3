//! Demo worker: a CPU-bound calculation with progress reporting
//!
//! Waits for `{"command": "start", "iterations": N}`, then sums square roots
//! and reports progress every tenth of the way. Failures are reported to the
//! host as an `error` message before exiting with code 1.

use chrono::Local;
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use longday_core::worker::WorkerReport;
use worker_host::{HostError, Result, WorkerChannel};

const DEFAULT_ITERATIONS: u64 = 500_000_000;

fn perform_heavy_task(channel: &mut WorkerChannel, iterations: u64) -> Result<f64> {
    let step = (iterations / 10).max(1);
    let mut total = 0.0;
    for i in 0..iterations {
        total += (i as f64).sqrt();
        if i > 0 && i % step == 0 {
            let progress = ((i as f64 / iterations as f64) * 100.0).round() as u8;
            channel.send(&WorkerReport::progress(progress))?;
        }
    }
    channel.send(&WorkerReport::progress(100))?;
    Ok(total)
}

fn iterations(message: &Value) -> Result<u64> {
    match message.get("iterations") {
        None | Some(Value::Null) => Ok(DEFAULT_ITERATIONS),
        Some(value) => value
            .as_u64()
            .filter(|n| *n > 0)
            .ok_or_else(|| HostError::protocol(format!("Invalid iteration count: {}", value))),
    }
}

fn handle_start(channel: &mut WorkerChannel, message: &Value) -> Result<()> {
    let iterations = iterations(message)?;

    channel.send(&WorkerReport::status("Task started..."))?;
    let total = perform_heavy_task(channel, iterations)?;
    channel.send(&WorkerReport::status("Task finished!"))?;
    channel.send(&WorkerReport::result(format!(
        "Calculation result is {:.2}. Task finished at {}.",
        total,
        Local::now().format("%H:%M:%S")
    )))
}

fn run(channel: &mut WorkerChannel) -> Result<()> {
    info!("Worker has been started successfully!");
    channel.send(&WorkerReport::Ready)?;

    while let Some(message) = channel.recv()? {
        info!("Worker received a message: {}", message);
        if message.get("command").and_then(Value::as_str) == Some("start") {
            return handle_start(channel, &message);
        }
    }

    info!("Host closed the channel");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let mut channel = match WorkerChannel::connect_from_env() {
        Ok(channel) => channel,
        Err(e) => {
            error!("Failed to connect to host: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = channel.report_panics() {
        warn!("Panics will not be reported to the host: {}", e);
    }

    if let Err(e) = run(&mut channel) {
        error!("Worker failed: {}", e);
        if let Err(report_err) = channel.report_error(e.to_string()) {
            warn!("Failed to report error to host: {}", report_err);
        }
        std::process::exit(1);
    }
}
