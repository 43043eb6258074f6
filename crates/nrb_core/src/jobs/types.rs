//! Job data model.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Status of a job in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, not started.
    #[default]
    Pending,
    /// A worker is running.
    Processing,
    /// Output written and kept.
    Done,
    /// Stopped by cancel or abort.
    Cancelled,
    /// Load or write failed.
    Error,
}

impl JobStatus {
    /// Get display string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Error)
    }

    /// Whether `self -> next` is allowed.
    ///
    /// `Cancelled -> Cancelled` is accepted so that a worker observing a
    /// cancel already applied by the orchestrator is a no-op.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing) => true,
            (Self::Processing, Self::Done | Self::Cancelled | Self::Error) => true,
            (Self::Cancelled, Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single job. Identity is the source path.
#[derive(Debug, Clone)]
pub struct Job {
    /// Source file path.
    pub path: PathBuf,
    /// Current status.
    pub status: JobStatus,
    /// Fraction of chunks completed, in [0, 1].
    pub progress: f64,
    /// Output path, set once writing begins.
    pub output_path: Option<PathBuf>,
    /// Set when a cancel or abort was requested for this job.
    pub cancel_requested: bool,
    /// Error message if status is `Error`.
    pub error_message: Option<String>,
    /// Id of the worker run that owns this job (0 before the first start).
    pub run: u64,
}

impl Job {
    /// Create a pending job.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            status: JobStatus::Pending,
            progress: 0.0,
            output_path: None,
            cancel_requested: false,
            error_message: None,
            run: 0,
        }
    }

    /// Display name (file name of the source).
    pub fn name(&self) -> String {
        display_name(&self.path)
    }

    /// Apply a transition if the state machine allows it.
    ///
    /// Returns true if the status changed.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) || self.status == next {
            return false;
        }
        self.status = next;
        true
    }

    /// Reset per-run fields before worker run `run` starts.
    pub fn begin(&mut self, run: u64) -> bool {
        if !self.transition(JobStatus::Processing) {
            return false;
        }
        self.run = run;
        self.progress = 0.0;
        self.output_path = None;
        self.cancel_requested = false;
        self.error_message = None;
        true
    }

    /// Read-only view of the job.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            path: self.path.clone(),
            name: self.name(),
            status: self.status,
            progress: self.progress,
            output_path: self.output_path.clone(),
            error_message: self.error_message.clone(),
        }
    }
}

/// Cloneable, serializable view of a job for consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub path: PathBuf,
    pub name: String,
    pub status: JobStatus,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// File name of a path, or the whole path when it has none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
