//! Load, latency and hostname demo handlers

use crate::state::SharedState;
use axum::extract::State;
use std::fs::OpenOptions;
use std::io::Write;
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::{info, warn};

/// Fixed latency of `/slow` and of the `/heavy` reply
pub const SLOW_DELAY: Duration = Duration::from_secs(3);

pub async fn slow_handler() -> &'static str {
    tokio::time::sleep(SLOW_DELAY).await;
    "Executed slow load"
}

/// Start one busy worker per CPU and reply after [`SLOW_DELAY`]
///
/// Workers are detached and run until the process exits.
pub async fn heavy_handler() -> &'static str {
    let workers = start_load();
    info!(workers, "Starting heavy load");
    tokio::time::sleep(SLOW_DELAY).await;
    "Starting heavy load"
}

pub async fn hostname_handler(State(state): State<SharedState>) -> String {
    match hostname::get() {
        Ok(name) => state.config.decorate_hostname(&name.to_string_lossy()),
        Err(e) => {
            warn!(error = %e, "Unable to read hostname");
            format!("Unable to read hostname: {}", e)
        }
    }
}

/// Spawn the load workers, returns how many were requested
pub fn start_load() -> usize {
    let workers = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);

    for i in 0..workers {
        let spawned = std::thread::Builder::new()
            .name(format!("kad-load-{}", i))
            .spawn(burn);
        if let Err(e) = spawned {
            warn!(worker = i, error = %e, "Unable to start load worker");
        }
    }
    workers
}

fn burn() {
    match OpenOptions::new().write(true).open("/dev/null") {
        Ok(mut sink) => loop {
            let _ = sink.write_all(b".");
        },
        Err(_) => {
            let mut sink = std::io::sink();
            loop {
                let _ = sink.write_all(b".");
            }
        }
    }
}
