//! Error types for job processing and the batch API.
//!
//! Job errors carry the path they concern:
//! Job → Load/Write → audio I/O detail
//! Job → Publish → rename detail

use std::path::PathBuf;

use thiserror::Error;

use crate::audio::AudioIoError;

/// Job-level failure. Every variant except `Cancelled` ends the job in `error`.
#[derive(Error, Debug)]
pub enum JobError {
    /// The source could not be loaded. No chunks were attempted.
    #[error("Failed to load '{}': {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: AudioIoError,
    },

    /// The output could not be written.
    #[error("Failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: AudioIoError,
    },

    /// The finished output could not be moved into place.
    #[error("Failed to publish '{}': {source}", path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The derived output path would replace a queued source file.
    #[error("Output '{}' would overwrite queued source '{}'", output.display(), input.display())]
    SourceCollision { input: PathBuf, output: PathBuf },

    /// The output already exists and the collision policy is `fail`.
    #[error("Output '{}' already exists", path.display())]
    OutputExists { path: PathBuf },

    /// Cancellation was observed at a checkpoint. Not a failure.
    #[error("Job '{}' was cancelled", path.display())]
    Cancelled { path: PathBuf },
}

impl JobError {
    /// Create a load error.
    pub fn load(path: impl Into<PathBuf>, source: AudioIoError) -> Self {
        Self::Load {
            path: path.into(),
            source,
        }
    }

    /// Create a write error.
    pub fn write(path: impl Into<PathBuf>, source: AudioIoError) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Create a publish error.
    pub fn publish(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Publish {
            path: path.into(),
            source,
        }
    }

    /// Create a source collision error.
    pub fn source_collision(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self::SourceCollision {
            input: input.into(),
            output: output.into(),
        }
    }

    /// Create an output-exists error.
    pub fn output_exists(path: impl Into<PathBuf>) -> Self {
        Self::OutputExists { path: path.into() }
    }

    /// Create a cancelled marker.
    pub fn cancelled(path: impl Into<PathBuf>) -> Self {
        Self::Cancelled { path: path.into() }
    }

    /// Whether this is the cancellation outcome rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Misuse of the batch API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// No job with this path is queued.
    #[error("No job queued for '{}'", path.display())]
    UnknownJob { path: PathBuf },

    /// The job is processing; it was cancelled instead of removed.
    #[error("Job '{}' is processing and cannot be removed", path.display())]
    JobBusy { path: PathBuf },
}

impl OrchestratorError {
    /// Create an unknown job error.
    pub fn unknown_job(path: impl Into<PathBuf>) -> Self {
        Self::UnknownJob { path: path.into() }
    }

    /// Create a job busy error.
    pub fn job_busy(path: impl Into<PathBuf>) -> Self {
        Self::JobBusy { path: path.into() }
    }
}

/// Result type for job processing.
pub type JobResult<T> = Result<T, JobError>;

/// Result type for batch operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_path() {
        let err = JobError::output_exists("/music/a_cleaned.wav");
        assert_eq!(err.to_string(), "Output '/music/a_cleaned.wav' already exists");

        let err = OrchestratorError::job_busy("/music/a.wav");
        assert!(err.to_string().contains("/music/a.wav"));
    }

    #[test]
    fn load_error_keeps_source() {
        use std::error::Error as _;

        let io = AudioIoError::Unsupported {
            path: PathBuf::from("a.wav"),
            message: "zero channels".to_string(),
        };
        let err = JobError::load("a.wav", io);
        assert!(err.source().is_some());
        assert!(!err.is_cancelled());
        assert!(JobError::cancelled("a.wav").is_cancelled());
    }
}
