//! Tracing configuration and log routing.
//!
//! Logs go to stdout through a compact formatter and, when a log file can be
//! opened, to that file as well. `RAGPIPE_LOG_FILE` names the file; without
//! it one is created under `logs/ragpipe.log`. File writes go through a
//! non-blocking writer so the streaming hot path never stalls on disk I/O.

use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Keeps the non-blocking writer's worker alive for the process lifetime.
static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Call once at startup;
/// library users embedding the pipeline can install their own subscriber
/// instead.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry().with(filter).with(stdout);

    match file_writer() {
        Some(writer) => {
            let file = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .compact();
            registry.with(file).init();
        }
        None => registry.init(),
    }
}

fn file_writer() -> Option<NonBlocking> {
    let (non_blocking, guard) = match std::env::var("RAGPIPE_LOG_FILE") {
        Ok(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|err| eprintln!("Failed to open log file {path}: {err}"))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        Err(_) => {
            std::fs::create_dir_all("logs")
                .map_err(|err| eprintln!("Failed to create logs directory: {err}"))
                .ok()?;
            tracing_appender::non_blocking(tracing_appender::rolling::never("logs", "ragpipe.log"))
        }
    };
    let _ = WRITER_GUARD.set(guard);
    Some(non_blocking)
}
