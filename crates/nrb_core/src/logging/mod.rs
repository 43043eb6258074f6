//! Logging infrastructure for Noise Reducer Batch.
//!
//! This module provides:
//! - Global `tracing` subscriber setup (stderr, optional log file)
//! - Per-job loggers with compact progress filtering
//! - Tail buffer for error diagnosis
//!
//! # Example
//!
//! ```no_run
//! use nrb_core::logging::{JobLogger, LogConfig};
//!
//! let logger = JobLogger::with_file("take_01", "/path/to/logs", LogConfig::default()).unwrap();
//! logger.phase("Reduce");
//! logger.progress(0.5);
//! logger.success("Output written");
//! ```

mod job_logger;
mod types;

use std::path::Path;

pub use job_logger::{log_file_name, JobLogger};
pub use types::{LogConfig, LogLevel, MessagePrefix};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// File name of the application log inside the logs folder.
pub const APP_LOG_FILE: &str = "noise-reducer.log";

/// Install the global subscriber writing to stderr.
///
/// `RUST_LOG` wins over `default_level`. Call once per process.
pub fn init_tracing(default_level: LogLevel) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(build_filter(default_level))
        .init();
}

/// Like [`init_tracing`], plus a copy of every event in
/// `<log_dir>/noise-reducer.log`.
///
/// Keep the guard until exit; dropping it flushes the file. Returns `None`
/// and logs to stderr only if the folder cannot be created.
pub fn init_tracing_with_file(default_level: LogLevel, log_dir: &Path) -> Option<WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        init_tracing(default_level);
        tracing::warn!("Failed to create log folder {}: {}", log_dir.display(), e);
        return None;
    }

    let appender = tracing_appender::rolling::never(log_dir, APP_LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(build_filter(default_level))
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Some(guard)
}

/// Warn-level subscriber routed through the test harness.
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

fn build_filter(default_level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_filter_str()))
}
