//! Command-line arguments.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum, ValueHint};

use nrb_core::config::{CollisionPolicy, Settings};
use nrb_core::logging::LogLevel;

/// `--collision` values.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollisionArg {
    /// Replace the existing file.
    Overwrite,
    /// Append `_1`, `_2`, ... until the name is free.
    Rename,
    /// Fail the job.
    Fail,
}

impl From<CollisionArg> for CollisionPolicy {
    fn from(arg: CollisionArg) -> Self {
        match arg {
            CollisionArg::Overwrite => CollisionPolicy::Overwrite,
            CollisionArg::Rename => CollisionPolicy::Rename,
            CollisionArg::Fail => CollisionPolicy::Fail,
        }
    }
}

/// Batch noise reduction for audio files.
#[derive(Parser, Debug)]
#[command(name = "noise-reducer", author, version, about, long_about = None)]
pub struct Args {
    /// Audio files to process.
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    pub files: Vec<PathBuf>,

    /// Settings file (created with defaults if missing).
    #[arg(long, default_value = ".config/settings.toml", value_hint = ValueHint::FilePath)]
    pub config: PathBuf,

    /// Suffix appended to each output file stem.
    #[arg(long)]
    pub suffix: Option<String>,

    /// Write outputs here instead of next to each source.
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,

    /// What to do when an output file already exists.
    #[arg(long, value_enum)]
    pub collision: Option<CollisionArg>,

    /// Apply the low-pass post filter.
    #[arg(long)]
    pub post_filter: bool,

    /// Post filter cutoff in Hz.
    #[arg(long)]
    pub cutoff_hz: Option<f64>,

    /// Skip noise reduction and copy samples unchanged.
    #[arg(long)]
    pub identity: bool,

    /// Write the overridden [paths] and [processing] tables back to the
    /// settings file.
    #[arg(long)]
    pub save: bool,

    /// Print final job states as JSON.
    #[arg(long)]
    pub json: bool,

    /// Increase logging verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Log level from the configured level and `-v` count.
    pub fn log_level(&self, configured: LogLevel) -> LogLevel {
        match self.verbose {
            0 => configured,
            1 => configured.min(LogLevel::Debug),
            _ => LogLevel::Trace,
        }
    }

    /// Apply command-line overrides on top of loaded settings.
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(ref suffix) = self.suffix {
            settings.processing.output_suffix = suffix.clone();
        }
        if let Some(ref dir) = self.output_dir {
            settings.paths.output_folder = dir.to_string_lossy().into_owned();
        }
        if let Some(collision) = self.collision {
            settings.processing.collision = collision.into();
        }
        if self.post_filter {
            settings.processing.post_filter_enabled = true;
        }
        if let Some(cutoff) = self.cutoff_hz {
            settings.processing.post_filter_cutoff_hz = cutoff;
        }
    }
}
