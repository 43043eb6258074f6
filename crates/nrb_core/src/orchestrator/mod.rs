//! Batch job orchestration and cancellation.
//!
//! # Architecture
//!
//! ```text
//! JobOrchestrator (job table, event sender)
//!     ├── CancellationRegistry (batch token → per-job child tokens)
//!     ├── OutputTracker (outputs written in this batch)
//!     └── JobWorker × N (one thread per started job)
//!             load → profile → plan_chunks → transform per chunk
//!                  → write partial → rename into place on commit
//! ```
//!
//! Workers never touch consumer state: every status or progress change is
//! published as a [`JobEvent`] on one channel.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use nrb_core::config::Settings;
//! use nrb_core::orchestrator::JobOrchestrator;
//!
//! let (orchestrator, events) = JobOrchestrator::builder(Settings::default()).build();
//! orchestrator.add_job("/music/take_01.wav");
//! orchestrator.start_all();
//!
//! while orchestrator.is_any_processing() {
//!     for event in events.try_iter() {
//!         println!("{:?}", event);
//!     }
//!     orchestrator.wait_idle(Duration::from_millis(100));
//! }
//! ```

mod cancel;
mod errors;
mod events;
#[allow(clippy::module_inception)]
mod orchestrator;
mod planner;
mod state;
mod tracker;
mod worker;

pub use cancel::{CancelToken, CancellationRegistry};
pub use errors::{JobError, JobResult, OrchestratorError, OrchestratorResult};
pub use events::JobEvent;
pub use orchestrator::{JobOrchestrator, OrchestratorBuilder, StopOutcome};
pub use planner::{chunk_count, plan_chunks, MAX_CHUNKS, MIN_CHUNKS, SAMPLES_PER_EXTRA_CHUNK};
pub use tracker::{DeleteReport, OutputTracker};
