//! Per-job logger.
//!
//! Every line goes to `tracing` with a `job` field and to the job's own log
//! file when one was opened. The last `error_tail` lines are kept so a
//! failing job can dump its recent history.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::types::{LogConfig, LogLevel, MessagePrefix};

/// Mutable logger state behind one lock.
struct LoggerState {
    file: Option<BufWriter<File>>,
    tail: VecDeque<String>,
    /// Last progress bucket written (compact mode).
    last_bucket: Option<u32>,
}

/// Logger owned by one job worker.
pub struct JobLogger {
    job_name: String,
    log_path: Option<PathBuf>,
    config: LogConfig,
    state: Mutex<LoggerState>,
}

impl JobLogger {
    /// Logger without a file: `tracing` and tail only.
    pub fn detached(job_name: impl Into<String>, config: LogConfig) -> Self {
        Self {
            job_name: job_name.into(),
            log_path: None,
            state: Mutex::new(LoggerState {
                file: None,
                tail: VecDeque::with_capacity(config.error_tail),
                last_bucket: None,
            }),
            config,
        }
    }

    /// Logger that also writes `log_path` (truncated). Missing parent
    /// directories are created.
    pub fn with_file(
        job_name: impl Into<String>,
        log_path: impl Into<PathBuf>,
        config: LogConfig,
    ) -> io::Result<Self> {
        let mut logger = Self::detached(job_name, config);
        let path = log_path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        logger.state.get_mut().file = Some(BufWriter::new(File::create(&path)?));
        logger.log_path = Some(path);
        Ok(logger)
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Path of the job log file, if one is open.
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Write a line at `level`; lines below the configured level are dropped.
    pub fn log(&self, level: LogLevel, message: &str) {
        if level < self.config.level {
            return;
        }

        let job = self.job_name.as_str();
        match level {
            LogLevel::Trace => tracing::trace!(job = %job, "{}", message),
            LogLevel::Debug => tracing::debug!(job = %job, "{}", message),
            LogLevel::Info => tracing::info!(job = %job, "{}", message),
            LogLevel::Warn => tracing::warn!(job = %job, "{}", message),
            LogLevel::Error => tracing::error!(job = %job, "{}", message),
        }

        let line = self.stamp(message);
        {
            let mut state = self.state.lock();
            if self.config.error_tail > 0 {
                while state.tail.len() >= self.config.error_tail {
                    state.tail.pop_front();
                }
                state.tail.push_back(line.clone());
            }
            write_line(&mut state, &line);
        }
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, &MessagePrefix::Warning.format(message));
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, &MessagePrefix::Error.format(message));
    }

    /// `=== name ===` marker.
    pub fn phase(&self, name: &str) {
        self.log(LogLevel::Info, &MessagePrefix::Phase.format(name));
    }

    pub fn success(&self, message: &str) {
        self.log(LogLevel::Info, &MessagePrefix::Success.format(message));
    }

    /// Log job progress given as a fraction in [0, 1].
    ///
    /// In compact mode only the first report, each new `progress_step`
    /// bucket and completion are written. Returns true if a line was written.
    pub fn progress(&self, fraction: f64) -> bool {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
        {
            let mut state = self.state.lock();
            if self.config.compact {
                let bucket = percent / self.config.progress_step.max(1);
                let repeat = state.last_bucket.is_some_and(|last| bucket <= last);
                if repeat && percent < 100 {
                    return false;
                }
                state.last_bucket = Some(bucket);
            }
        }
        self.log(LogLevel::Info, &format!("Progress: {}%", percent));
        true
    }

    /// Write the tail buffer under a header (file only).
    pub fn dump_tail(&self, reason: &str) {
        let lines = self.tail();
        if lines.is_empty() {
            return;
        }

        let header = self.stamp(&format!("--- last {} lines ({}) ---", lines.len(), reason));
        let mut state = self.state.lock();
        write_line(&mut state, &header);
        for line in &lines {
            write_line(&mut state, line);
        }
    }

    /// Most recent lines, oldest first.
    pub fn tail(&self) -> Vec<String> {
        self.state.lock().tail.iter().cloned().collect()
    }

    /// Flush and release the log file. Later lines skip the file.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let Some(mut file) = state.file.take() {
            let _ = file.flush();
        }
    }

    fn stamp(&self, message: &str) -> String {
        if self.config.show_timestamps {
            format!("[{}] {}", Local::now().format("%H:%M:%S"), message)
        } else {
            message.to_string()
        }
    }
}

impl Drop for JobLogger {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_line(state: &mut LoggerState, line: &str) {
    if let Some(file) = state.file.as_mut() {
        let _ = writeln!(file, "{}", line);
    }
}

/// Log file name for a source: `<name>.<hash>.log`, where the hash is the
/// first 8 hex digits of the SHA-256 of the full source path.
pub fn log_file_name(source: &Path) -> String {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string_lossy().into_owned());
    let digest = format!("{:x}", Sha256::digest(source.to_string_lossy().as_bytes()));
    format!("{}.{}.log", sanitize_filename(&name), &digest[..8])
}

/// Replace characters that are not safe in file names.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
