//! Lifecycle of one job: load, reduce chunk by chunk, write, commit.
//!
//! The worker writes into a hidden partial file next to the output. Only
//! the commit, under the table lock, renames it into place, so a cancel,
//! abort or failure never touches a file that was there before the run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::cancel::CancelToken;
use super::errors::{JobError, JobResult};
use super::planner::plan_chunks;
use super::state::Shared;
use super::tracker::remove_file_if_exists;
use crate::audio::{apply_checked, filtering};
use crate::jobs::{display_name, output_path_for, JobStatus};
use crate::logging::{log_file_name, JobLogger, LogConfig};

/// Sibling file a run writes before its output is published:
/// `.<stem>.<run>.partial.<ext>`.
pub(crate) fn partial_path(output: &Path, run: u64) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match output.extension() {
        Some(ext) => format!(".{}.{}.partial.{}", stem, run, ext.to_string_lossy()),
        None => format!(".{}.{}.partial", stem, run),
    };
    output.with_file_name(name)
}

/// Result of the processing phase, before the commit.
struct Written {
    output: PathBuf,
    partial: PathBuf,
    samples: usize,
}

/// Worker for exactly one run of one job.
pub(crate) struct JobWorker {
    shared: Arc<Shared>,
    path: PathBuf,
    run: u64,
    token: CancelToken,
    logger: JobLogger,
}

impl JobWorker {
    pub fn new(shared: Arc<Shared>, path: PathBuf, run: u64, token: CancelToken) -> Self {
        let logger = create_logger(&shared, &path);
        Self {
            shared,
            path,
            run,
            token,
            logger,
        }
    }

    /// Run to a terminal state and notify the orchestrator.
    pub fn run(self) {
        self.logger.phase(&format!("Processing {}", self.path.display()));
        let result = self.process();
        self.commit(result);
        self.shared.registry.forget_run(&self.path, self.run);
        self.logger.close();
        self.shared.worker_finished();
    }

    fn process(&self) -> JobResult<Written> {
        let io = self.shared.audio_io.as_ref();
        let processing = &self.shared.settings.processing;

        let buffer = io
            .load(&self.path)
            .map_err(|e| JobError::load(&self.path, e))?;
        let sample_rate = buffer.sample_rate;
        let samples = buffer.samples;
        self.logger.info(&format!(
            "Loaded {} samples at {} Hz",
            samples.len(),
            sample_rate
        ));

        let profile_len = ((processing.noise_profile_seconds * f64::from(sample_rate)).round()
            as usize)
            .min(samples.len());
        let profile = &samples[..profile_len];

        let plan = plan_chunks(samples.len());
        let total = plan.len();
        self.logger.phase(&format!(
            "Reduce with {} ({} chunks, {} profile samples)",
            self.shared.transform.name(),
            total,
            profile_len
        ));

        let mut output = Vec::with_capacity(samples.len());
        for (index, range) in plan.into_iter().enumerate() {
            if self.token.is_cancelled() {
                self.logger
                    .warn(&format!("Cancelled before chunk {}/{}", index + 1, total));
                return Err(JobError::cancelled(&self.path));
            }

            let chunk = &samples[range];
            match apply_checked(self.shared.transform.as_ref(), chunk, sample_rate, profile) {
                Ok(reduced) => output.extend_from_slice(&reduced),
                Err(e) => {
                    self.logger.warn(&format!(
                        "Chunk {}/{} passed through unchanged: {}",
                        index + 1,
                        total,
                        e
                    ));
                    output.extend_from_slice(chunk);
                }
            }

            let progress = (index + 1) as f64 / total as f64;
            self.report_progress(progress);
        }
        if total == 0 {
            self.report_progress(1.0);
        }
        debug_assert_eq!(output.len(), samples.len());

        if processing.post_filter_enabled {
            self.logger.debug(&format!(
                "Low-pass at {} Hz",
                processing.post_filter_cutoff_hz
            ));
            output = filtering::low_pass(
                &output,
                sample_rate,
                processing.post_filter_cutoff_hz,
                filtering::DEFAULT_ORDER,
            );
        }

        if self.token.is_cancelled() {
            return Err(JobError::cancelled(&self.path));
        }

        let output_path = self.reserve_output()?;
        let partial = partial_path(&output_path, self.run);
        self.logger.phase("Write");
        if let Err(e) = io.write(&partial, &output, sample_rate) {
            self.discard(&partial);
            return Err(JobError::write(&output_path, e));
        }

        Ok(Written {
            output: output_path,
            partial,
            samples: output.len(),
        })
    }

    fn report_progress(&self, progress: f64) {
        self.shared
            .table
            .lock()
            .set_progress(&self.path, self.run, progress);
        self.logger.progress(progress);
    }

    /// Derive the output path, claim it for this run and record it on the job.
    fn reserve_output(&self) -> JobResult<PathBuf> {
        let mut table = self.shared.table.lock();
        if !table.is_running(&self.path, self.run) {
            return Err(JobError::cancelled(&self.path));
        }
        let taken = table.reserved_paths(&self.path, self.run);
        let output = output_path_for(&self.path, &self.shared.settings, &taken)?;
        table.reserve(output.clone(), self.run);
        if let Some(job) = table.get_mut(&self.path) {
            job.output_path = Some(output.clone());
        }
        Ok(output)
    }

    /// Publish the terminal state exactly once.
    ///
    /// Runs under the table lock, so a concurrent cancel or abort either
    /// sees the published output or finds this job already cancelled. A
    /// run that no longer owns its job (it was removed and queued again)
    /// only cleans up after itself.
    fn commit(&self, result: JobResult<Written>) {
        let mut table = self.shared.table.lock();
        let owned = table.owns(&self.path, self.run);
        let running = table.is_running(&self.path, self.run);
        table.release(self.run);

        match result {
            Ok(written) if running && !self.token.is_cancelled() => {
                match fs::rename(&written.partial, &written.output) {
                    Ok(()) => {
                        self.shared.tracker.record(&written.output);
                        table.set_status(&self.path, JobStatus::Done, None);
                        table.record_completion(&self.path);
                        drop(table);
                        self.logger.success(&format!(
                            "Wrote {} samples to {}",
                            written.samples,
                            written.output.display()
                        ));
                    }
                    Err(e) => {
                        let err = JobError::publish(&written.output, e);
                        table.set_status(&self.path, JobStatus::Error, Some(err.to_string()));
                        drop(table);
                        self.discard(&written.partial);
                        self.logger.error(&err.to_string());
                        self.logger.dump_tail("error");
                    }
                }
            }
            Ok(written) => {
                if owned {
                    table.set_status(&self.path, JobStatus::Cancelled, None);
                }
                drop(table);
                self.discard(&written.partial);
                self.logger.warn("Cancelled after write; output discarded");
            }
            Err(e) if e.is_cancelled() => {
                if owned {
                    table.set_status(&self.path, JobStatus::Cancelled, None);
                }
                drop(table);
                self.logger.warn("Cancelled");
            }
            Err(e) => {
                let changed =
                    owned && table.set_status(&self.path, JobStatus::Error, Some(e.to_string()));
                drop(table);
                if changed {
                    self.logger.error(&e.to_string());
                    self.logger.dump_tail("error");
                } else {
                    tracing::debug!(job = %self.logger.job_name(), "Failure after cancel: {}", e);
                }
            }
        }
    }

    fn discard(&self, partial: &Path) {
        if let Err(e) = remove_file_if_exists(partial) {
            self.logger.warn(&format!(
                "Could not remove partial output {}: {}",
                partial.display(),
                e
            ));
        }
    }
}

fn create_logger(shared: &Shared, path: &Path) -> JobLogger {
    let name = display_name(path);
    let config = LogConfig::from_settings(&shared.settings.logging);

    match (&shared.log_dir, shared.settings.logging.per_job_files) {
        (Some(dir), true) => {
            match JobLogger::with_file(&name, dir.join(log_file_name(path)), config.clone()) {
                Ok(logger) => logger,
                Err(e) => {
                    tracing::warn!("Failed to create job log for {}: {}", name, e);
                    JobLogger::detached(name, config)
                }
            }
        }
        _ => JobLogger::detached(name, config),
    }
}
