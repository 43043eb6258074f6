//! NRB Core - Backend logic for Noise Reducer Batch
//!
//! This crate contains the batch job engine with zero UI dependencies:
//! a queue of audio files, one worker thread per started job, chunked
//! noise reduction with progress events, cooperative cancellation and
//! rollback of outputs written during an aborted batch.
//!
//! It can be driven by the bundled CLI or by any GUI that drains the
//! event channel on its own thread.

pub mod audio;
pub mod config;
pub mod jobs;
pub mod logging;
pub mod orchestrator;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
