//! Notifications published to the single consumer loop.

use std::path::PathBuf;

use crate::jobs::JobStatus;

/// Change notification for consumers (CLI, UI).
///
/// Events for one job arrive in the order the job table was mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A job was queued.
    Added { path: PathBuf },
    /// A job was removed from the queue.
    Removed { path: PathBuf },
    /// A job changed status.
    Status {
        path: PathBuf,
        status: JobStatus,
        message: Option<String>,
    },
    /// Chunk progress of a processing job.
    Progress { path: PathBuf, progress: f64 },
    /// The last worker of a batch finished without an abort.
    BatchFinished {
        done: usize,
        cancelled: usize,
        failed: usize,
    },
    /// Abort cleanup completed.
    Aborted {
        /// Outputs deleted from disk.
        deleted: usize,
        /// Workers still running when the grace period ended.
        stragglers: usize,
    },
}
