//! Batch settings, one TOML table per section: `[paths]`, `[processing]`
//! and `[logging]`. Missing keys fall back to their defaults.

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;

/// Everything the orchestrator and CLI read from the settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Where outputs and logs go.
    #[serde(default)]
    pub paths: PathSettings,

    /// Noise reduction and output handling.
    #[serde(default)]
    pub processing: ProcessingSettings,

    /// Application and per-job logging.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Path configuration for outputs and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Application log and per-job log files.
    #[serde(default = "default_logs_folder")]
    pub logs_folder: String,

    /// Output folder for cleaned files. Empty means next to the source.
    #[serde(default)]
    pub output_folder: String,
}

fn default_logs_folder() -> String {
    ".logs".to_string()
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            logs_folder: default_logs_folder(),
            output_folder: String::new(),
        }
    }
}

/// What to do when the derived output path already exists on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Replace the existing file.
    #[default]
    Overwrite,
    /// Pick the first free `<stem><suffix>_<n>.<ext>`.
    Rename,
    /// Fail the job.
    Fail,
}

/// Noise reduction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSettings {
    /// Suffix appended to the source file stem.
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,

    /// Collision handling for existing output files.
    #[serde(default)]
    pub collision: CollisionPolicy,

    /// Length of the leading excerpt used as noise profile.
    #[serde(default = "default_noise_profile_seconds")]
    pub noise_profile_seconds: f64,

    /// Apply the low-pass post filter after reduction.
    #[serde(default)]
    pub post_filter_enabled: bool,

    /// Cutoff of the post filter in Hz.
    #[serde(default = "default_post_filter_cutoff")]
    pub post_filter_cutoff_hz: f64,

    /// Upper bound on how long abort waits for workers before sweeping outputs.
    #[serde(default = "default_abort_grace_ms")]
    pub abort_grace_ms: u64,
}

fn default_output_suffix() -> String {
    "_cleaned".to_string()
}

fn default_noise_profile_seconds() -> f64 {
    0.8
}

fn default_post_filter_cutoff() -> f64 {
    18_000.0
}

fn default_abort_grace_ms() -> u64 {
    700
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            output_suffix: default_output_suffix(),
            collision: CollisionPolicy::default(),
            noise_profile_seconds: default_noise_profile_seconds(),
            post_filter_enabled: false,
            post_filter_cutoff_hz: default_post_filter_cutoff(),
            abort_grace_ms: default_abort_grace_ms(),
        }
    }
}

/// `[logging]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Minimum level for application and job logs.
    #[serde(default)]
    pub level: LogLevel,

    /// Log progress only when it crosses a `progress_step` boundary.
    #[serde(default = "default_true")]
    pub compact: bool,

    /// Progress bucket width in percent.
    #[serde(default = "default_progress_step")]
    pub progress_step: u32,

    /// Number of recent lines dumped when a job fails.
    #[serde(default = "default_error_tail")]
    pub error_tail: u32,

    /// Write one log file per job into the logs folder.
    #[serde(default)]
    pub per_job_files: bool,
}

fn default_true() -> bool {
    true
}

fn default_error_tail() -> u32 {
    20
}

fn default_progress_step() -> u32 {
    20
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            compact: true,
            progress_step: default_progress_step(),
            error_tail: default_error_tail(),
            per_job_files: false,
        }
    }
}

/// A top-level table of the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSection {
    Paths,
    Processing,
    Logging,
}

impl ConfigSection {
    /// All sections, in file order.
    pub const ALL: [ConfigSection; 3] = [
        ConfigSection::Paths,
        ConfigSection::Processing,
        ConfigSection::Logging,
    ];

    /// Table header without brackets.
    pub fn table_name(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "paths",
            ConfigSection::Processing => "processing",
            ConfigSection::Logging => "logging",
        }
    }
}
