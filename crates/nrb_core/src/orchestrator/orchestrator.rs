//! Batch API: queue, start, cancel and abort jobs.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::cancel::CancellationRegistry;
use super::errors::{OrchestratorError, OrchestratorResult};
use super::events::JobEvent;
use super::state::{BatchCounts, JobTable, Shared, WaitGroup};
use super::tracker::{remove_file_if_exists, DeleteReport, OutputTracker};
use super::worker::{partial_path, JobWorker};
use crate::audio::{AudioIo, NoiseTransform, SpectralGate, WavIo};
use crate::config::Settings;
use crate::jobs::{display_name, Job, JobSnapshot, JobStatus};

/// Builder for [`JobOrchestrator`].
pub struct OrchestratorBuilder {
    settings: Settings,
    audio_io: Arc<dyn AudioIo>,
    transform: Arc<dyn NoiseTransform>,
    log_dir: Option<PathBuf>,
}

impl OrchestratorBuilder {
    /// Start with WAV I/O and the spectral gate.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            audio_io: Arc::new(WavIo),
            transform: Arc::new(SpectralGate::default()),
            log_dir: None,
        }
    }

    /// Replace the file load/write collaborator.
    pub fn audio_io(mut self, audio_io: Arc<dyn AudioIo>) -> Self {
        self.audio_io = audio_io;
        self
    }

    /// Replace the per-chunk transform.
    pub fn transform(mut self, transform: Arc<dyn NoiseTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Folder for per-job log files (used when `logging.per_job_files` is set).
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Build the orchestrator and the receiver of its events.
    ///
    /// The receiver must be drained by exactly one consumer.
    pub fn build(self) -> (JobOrchestrator, Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel();
        let shared = Shared {
            settings: self.settings,
            audio_io: self.audio_io,
            transform: self.transform,
            log_dir: self.log_dir,
            table: Mutex::new(JobTable::new(tx)),
            registry: CancellationRegistry::new(),
            tracker: OutputTracker::new(),
            workers: WaitGroup::default(),
            aborting: Default::default(),
        };
        (
            JobOrchestrator {
                shared: Arc::new(shared),
            },
            rx,
        )
    }
}

/// What [`JobOrchestrator::stop_all`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// A batch was running and has been aborted.
    Aborted(DeleteReport),
    /// Nothing was running; this many jobs were removed from the queue.
    Cleared(usize),
}

/// Owns the job queue and runs one worker thread per started job.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct JobOrchestrator {
    shared: Arc<Shared>,
}

impl JobOrchestrator {
    /// Create a builder.
    pub fn builder(settings: Settings) -> OrchestratorBuilder {
        OrchestratorBuilder::new(settings)
    }

    /// Active settings.
    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// Queue a file. Returns false if the path is already queued.
    pub fn add_job(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        let mut table = self.shared.table.lock();
        if table.index_of(&path).is_some() {
            tracing::debug!("Ignoring duplicate job {}", path.display());
            return false;
        }
        table.jobs.push(Job::new(path.clone()));
        table.emit(JobEvent::Added { path });
        true
    }

    /// Remove a job that is not processing.
    ///
    /// A processing job is cancelled instead and `JobBusy` is returned.
    /// Outputs already written are left on disk.
    pub fn remove_job(&self, path: &Path) -> OrchestratorResult<()> {
        let mut table = self.shared.table.lock();
        let index = table
            .index_of(path)
            .ok_or_else(|| OrchestratorError::unknown_job(path))?;

        if table.jobs[index].status == JobStatus::Processing {
            drop(table);
            self.cancel_job(path)?;
            return Err(OrchestratorError::job_busy(path));
        }

        table.jobs.remove(index);
        self.shared.registry.forget(path);
        table.emit(JobEvent::Removed {
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Start a worker for every pending job. Returns how many were started.
    pub fn start_all(&self) -> usize {
        let mut table = self.shared.table.lock();
        let pending: Vec<PathBuf> = table
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| j.path.clone())
            .collect();
        if pending.is_empty() {
            return 0;
        }

        self.shared.registry.reset_for_new_batch();
        tracing::info!("Starting {} job(s)", pending.len());

        let mut started = 0;
        for path in pending {
            let Some(run) = table.begin(&path) else {
                continue;
            };
            table.emit(JobEvent::Status {
                path: path.clone(),
                status: JobStatus::Processing,
                message: None,
            });

            let token = self.shared.registry.register(&path, run);
            self.shared.workers.add();
            let worker = JobWorker::new(Arc::clone(&self.shared), path.clone(), run, token);
            let spawned = thread::Builder::new()
                .name(format!("job-{}", display_name(&path)))
                .spawn(move || worker.run());

            match spawned {
                Ok(_) => started += 1,
                Err(e) => {
                    tracing::error!("Failed to spawn worker for {}: {}", path.display(), e);
                    table.set_status(
                        &path,
                        JobStatus::Error,
                        Some(format!("Failed to start worker: {}", e)),
                    );
                    self.shared.registry.forget_run(&path, run);
                    self.shared.workers.done();
                }
            }
        }
        started
    }

    /// Cancel a processing job.
    ///
    /// Returns Ok(false) for a job that is not processing (no flags are
    /// touched). A partial output the run has started writing is deleted.
    /// The output path itself is never touched: a processing job has not
    /// published to it yet.
    pub fn cancel_job(&self, path: &Path) -> OrchestratorResult<bool> {
        let partial = {
            let mut table = self.shared.table.lock();
            let job = table
                .get_mut(path)
                .ok_or_else(|| OrchestratorError::unknown_job(path))?;
            if job.status != JobStatus::Processing {
                return Ok(false);
            }
            job.cancel_requested = true;
            let partial = job.output_path.as_deref().map(|o| partial_path(o, job.run));
            self.shared.registry.request_cancel(path);
            table.set_status(path, JobStatus::Cancelled, None);
            partial
        };

        tracing::info!("Cancelled {}", path.display());
        if let Some(partial) = partial {
            if let Err(e) = remove_file_if_exists(&partial) {
                tracing::warn!("Failed to delete partial output {}: {}", partial.display(), e);
            }
        }
        Ok(true)
    }

    /// Abort the batch and delete every output it produced.
    ///
    /// Waits for workers up to `processing.abort_grace_ms`, then sweeps.
    /// Workers still running after the grace period discard their own
    /// output when they finish.
    pub fn abort_all(&self) -> DeleteReport {
        {
            let mut table = self.shared.table.lock();
            self.shared.registry.request_global_abort();
            self.shared.aborting.store(true, Ordering::SeqCst);
            for job in table
                .jobs
                .iter_mut()
                .filter(|j| j.status == JobStatus::Processing)
            {
                job.cancel_requested = true;
            }
        }
        tracing::warn!("Abort requested");

        let grace = Duration::from_millis(self.shared.settings.processing.abort_grace_ms);
        if !self.shared.workers.wait(grace) {
            tracing::warn!(
                "{} worker(s) still running after {} ms",
                self.shared.workers.active(),
                grace.as_millis()
            );
        }
        let stragglers = self.shared.workers.active();
        let report = self.shared.tracker.delete_all();

        let mut table = self.shared.table.lock();
        let processing: Vec<PathBuf> = table
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Processing)
            .map(|j| j.path.clone())
            .collect();
        for path in &processing {
            table.set_status(path, JobStatus::Cancelled, None);
        }
        self.shared.registry.reset_for_new_batch();
        table.counts = BatchCounts::default();
        table.emit(JobEvent::Aborted {
            deleted: report.deleted.len(),
            stragglers,
        });
        self.shared.aborting.store(false, Ordering::SeqCst);

        tracing::info!(
            "Abort complete: {} output(s) deleted, {} missing, {} failed",
            report.deleted.len(),
            report.missing.len(),
            report.failed.len()
        );
        report
    }

    /// Stop button semantics: abort a running batch, or clear the whole
    /// queue when nothing is running.
    pub fn stop_all(&self) -> StopOutcome {
        let mut table = self.shared.table.lock();
        if table.any_processing() {
            drop(table);
            return StopOutcome::Aborted(self.abort_all());
        }
        let removed: Vec<PathBuf> = table.jobs.drain(..).map(|j| j.path).collect();
        for path in &removed {
            self.shared.registry.forget(path);
            table.emit(JobEvent::Removed { path: path.clone() });
        }
        tracing::info!("Cleared {} queued job(s)", removed.len());
        StopOutcome::Cleared(removed.len())
    }

    /// Sources of the most recently completed jobs, newest first, at most
    /// twenty and without duplicates.
    pub fn recent_completions(&self) -> Vec<PathBuf> {
        self.shared.table.lock().recent.iter().cloned().collect()
    }

    /// Whether any job is processing.
    pub fn is_any_processing(&self) -> bool {
        self.shared.table.lock().any_processing()
    }

    /// Whether an abort is in progress.
    pub fn is_aborting(&self) -> bool {
        self.shared.is_aborting()
    }

    /// Snapshots of all jobs in queue order.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.shared
            .table
            .lock()
            .jobs
            .iter()
            .map(Job::snapshot)
            .collect()
    }

    /// Snapshot of one job.
    pub fn job(&self, path: &Path) -> Option<JobSnapshot> {
        self.shared.table.lock().get(path).map(Job::snapshot)
    }

    pub fn len(&self) -> usize {
        self.shared.table.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.table.lock().jobs.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.shared
            .table
            .lock()
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count()
    }

    /// Outputs written in the current batch that an abort would delete.
    pub fn tracked_outputs(&self) -> Vec<PathBuf> {
        self.shared.tracker.snapshot()
    }

    /// Remove every job in a terminal state. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut table = self.shared.table.lock();
        let finished: Vec<PathBuf> = table
            .jobs
            .iter()
            .filter(|j| j.status.is_terminal())
            .map(|j| j.path.clone())
            .collect();
        table.jobs.retain(|j| !j.status.is_terminal());
        for path in &finished {
            self.shared.registry.forget(path);
            table.emit(JobEvent::Removed { path: path.clone() });
        }
        finished.len()
    }

    /// Block until no worker is running or `timeout` elapses.
    ///
    /// Returns true if idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.workers.wait(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBuffer, AudioIoError, AudioIoResult, IdentityTransform, TransformError};
    use parking_lot::Condvar;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tempfile::tempdir;

    const TIMEOUT: Duration = Duration::from_secs(20);

    /// Loads sources from memory, writes real WAV files.
    struct MemoryIo {
        sources: HashMap<PathBuf, AudioBuffer>,
    }

    impl MemoryIo {
        fn new(files: Vec<(PathBuf, Vec<f32>)>) -> Arc<Self> {
            let sources = files
                .into_iter()
                .map(|(path, samples)| {
                    (
                        path,
                        AudioBuffer {
                            samples,
                            sample_rate: 8_000,
                        },
                    )
                })
                .collect();
            Arc::new(Self { sources })
        }
    }

    impl AudioIo for MemoryIo {
        fn load(&self, path: &Path) -> AudioIoResult<AudioBuffer> {
            self.sources
                .get(path)
                .cloned()
                .ok_or_else(|| AudioIoError::Open {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such source"),
                })
        }

        fn write(&self, path: &Path, samples: &[f32], sample_rate: u32) -> AudioIoResult<()> {
            WavIo.write(path, samples, sample_rate)
        }
    }

    /// Holds every transform call whose chunk starts with `marker` until opened.
    #[derive(Default)]
    struct Gate {
        open: Mutex<bool>,
        cv: Condvar,
        waiting: AtomicUsize,
    }

    impl Gate {
        fn pass(&self) {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let mut open = self.open.lock();
            while !*open {
                self.cv.wait(&mut open);
            }
        }

        fn open(&self) {
            *self.open.lock() = true;
            self.cv.notify_all();
        }

        fn waiting(&self) -> usize {
            self.waiting.load(Ordering::SeqCst)
        }
    }

    struct GatedTransform {
        gate: Arc<Gate>,
        marker: f32,
    }

    impl NoiseTransform for GatedTransform {
        fn name(&self) -> &str {
            "gated"
        }

        fn apply(&self, chunk: &[f32], _: u32, _: &[f32]) -> Result<Vec<f32>, TransformError> {
            if chunk.first() == Some(&self.marker) {
                self.gate.pass();
            }
            Ok(chunk.to_vec())
        }
    }

    /// Holds the first transform call on `first` and the second on `second`.
    struct TwoStageTransform {
        first: Arc<Gate>,
        second: Arc<Gate>,
        calls: AtomicUsize,
    }

    impl NoiseTransform for TwoStageTransform {
        fn name(&self) -> &str {
            "two-stage"
        }

        fn apply(&self, chunk: &[f32], _: u32, _: &[f32]) -> Result<Vec<f32>, TransformError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => self.first.pass(),
                1 => self.second.pass(),
                _ => {}
            }
            Ok(chunk.to_vec())
        }
    }

    /// Holds every write on a gate. With `fail` set, leaves a stub file at
    /// the target and reports an error.
    struct HeldWriteIo {
        inner: Arc<MemoryIo>,
        gate: Arc<Gate>,
        fail: bool,
    }

    impl AudioIo for HeldWriteIo {
        fn load(&self, path: &Path) -> AudioIoResult<AudioBuffer> {
            self.inner.load(path)
        }

        fn write(&self, path: &Path, samples: &[f32], sample_rate: u32) -> AudioIoResult<()> {
            self.gate.pass();
            if self.fail {
                let _ = std::fs::write(path, b"half");
                return Err(AudioIoError::Unsupported {
                    path: path.to_path_buf(),
                    message: "disk full".to_string(),
                });
            }
            self.inner.write(path, samples, sample_rate)
        }
    }

    struct FailingTransform;

    impl NoiseTransform for FailingTransform {
        fn name(&self) -> &str {
            "failing"
        }

        fn apply(&self, _: &[f32], _: u32, _: &[f32]) -> Result<Vec<f32>, TransformError> {
            Err(TransformError::other("model unavailable"))
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn status_of(orch: &JobOrchestrator, path: &Path) -> JobStatus {
        orch.job(path).map(|j| j.status).unwrap_or(JobStatus::Pending)
    }

    /// File names in `dir` that are outputs or partial outputs.
    fn outputs_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains("_cleaned") || name.contains(".partial"))
            .collect();
        names.sort();
        names
    }

    fn gated(
        settings: Settings,
        io: Arc<MemoryIo>,
        marker: f32,
    ) -> (JobOrchestrator, Receiver<JobEvent>, Arc<Gate>) {
        crate::logging::init_test_tracing();
        let gate = Arc::new(Gate::default());
        let (orch, rx) = JobOrchestrator::builder(settings)
            .audio_io(io)
            .transform(Arc::new(GatedTransform {
                gate: Arc::clone(&gate),
                marker,
            }))
            .build();
        (orch, rx, gate)
    }

    #[test]
    fn identity_output_is_bit_identical() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("ten_seconds.wav");
        let samples: Vec<f32> = (0..441_000)
            .map(|i| ((i as f32) * 0.013).sin() * 0.4)
            .collect();
        WavIo.write(&source, &samples, 44_100).unwrap();

        let (orch, rx) = JobOrchestrator::builder(Settings::default())
            .transform(Arc::new(IdentityTransform))
            .build();
        assert!(orch.add_job(&source));
        assert_eq!(orch.start_all(), 1);
        assert!(orch.wait_idle(TIMEOUT));

        let job = orch.job(&source).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress, 1.0);
        let output = dir.path().join("ten_seconds_cleaned.wav");
        assert_eq!(job.output_path.as_deref(), Some(output.as_path()));

        let written = WavIo.load(&output).unwrap();
        assert_eq!(written.sample_rate, 44_100);
        assert_eq!(written.samples, samples);

        assert!(wait_for(|| orch.tracked_outputs().is_empty()));
        let events: Vec<JobEvent> = rx.try_iter().collect();
        let progress: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Progress { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 9);
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(progress.last().copied(), Some(1.0));
    }

    #[test]
    fn batch_finished_reports_totals() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.wav");
        let missing = dir.path().join("missing.wav");
        let io = MemoryIo::new(vec![(good.clone(), vec![0.2; 64])]);

        let (orch, rx) = JobOrchestrator::builder(Settings::default())
            .audio_io(io)
            .transform(Arc::new(IdentityTransform))
            .build();
        orch.add_job(&good);
        orch.add_job(&missing);
        orch.start_all();
        assert!(orch.wait_idle(TIMEOUT));

        let finished = wait_for(|| {
            rx.try_iter().any(|e| {
                e == JobEvent::BatchFinished {
                    done: 1,
                    cancelled: 0,
                    failed: 1,
                }
            })
        });
        assert!(finished);
        assert!(dir.path().join("good_cleaned.wav").exists());

        let failed = orch.job(&missing).unwrap();
        assert_eq!(failed.status, JobStatus::Error);
        assert!(failed
            .error_message
            .unwrap()
            .contains("Failed to load"));
        assert!(failed.output_path.is_none());
    }

    #[test]
    fn cancel_mid_job_leaves_no_output() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("take.wav");
        let mut samples = vec![0.1f32; 800];
        samples[300] = 0.5;
        let (orch, rx, gate) = gated(
            Settings::default(),
            MemoryIo::new(vec![(source.clone(), samples)]),
            0.5,
        );

        orch.add_job(&source);
        orch.start_all();
        assert!(wait_for(|| gate.waiting() == 1));
        assert_eq!(orch.job(&source).unwrap().progress, 3.0 / 8.0);
        assert!(orch.is_any_processing());

        assert!(orch.cancel_job(&source).unwrap());
        assert_eq!(status_of(&orch, &source), JobStatus::Cancelled);
        gate.open();
        assert!(orch.wait_idle(TIMEOUT));

        assert_eq!(status_of(&orch, &source), JobStatus::Cancelled);
        assert!(!orch.is_any_processing());
        assert!(!dir.path().join("take_cleaned.wav").exists());
        assert!(orch.tracked_outputs().is_empty());

        let cancelled = rx
            .try_iter()
            .filter(|e| {
                matches!(
                    e,
                    JobEvent::Status {
                        status: JobStatus::Cancelled,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(cancelled, 1);
    }

    #[test]
    fn abort_all_cancels_every_job_and_deletes_outputs() {
        let dir = tempdir().unwrap();
        let fast = dir.path().join("fast.wav");
        let slow: Vec<PathBuf> = (0..3)
            .map(|i| dir.path().join(format!("slow_{}.wav", i)))
            .collect();
        let mut files = vec![(fast.clone(), vec![0.1f32; 400])];
        files.extend(slow.iter().map(|p| (p.clone(), vec![0.5f32; 400])));

        let mut settings = Settings::default();
        settings.processing.abort_grace_ms = 20_000;
        let (orch, rx, gate) = gated(settings, MemoryIo::new(files), 0.5);

        orch.add_job(&fast);
        for path in &slow {
            orch.add_job(path);
        }
        assert_eq!(orch.start_all(), 4);
        assert!(wait_for(|| status_of(&orch, &fast) == JobStatus::Done));
        assert!(wait_for(|| gate.waiting() == 3));
        let fast_output = dir.path().join("fast_cleaned.wav");
        assert!(fast_output.exists());
        assert_eq!(orch.tracked_outputs(), vec![fast_output.clone()]);

        let aborter = {
            let orch = orch.clone();
            thread::spawn(move || orch.abort_all())
        };
        assert!(wait_for(|| orch.is_aborting()));
        gate.open();
        let report = aborter.join().unwrap();

        assert_eq!(report.deleted, vec![fast_output.clone()]);
        assert!(!fast_output.exists());
        for path in &slow {
            assert_eq!(status_of(&orch, path), JobStatus::Cancelled);
        }
        assert!(orch.tracked_outputs().is_empty());
        assert!(!orch.is_any_processing());
        assert!(!orch.is_aborting());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains("_cleaned"))
            .collect();
        assert!(leftovers.is_empty());

        let events: Vec<JobEvent> = rx.try_iter().collect();
        assert!(events.contains(&JobEvent::Aborted {
            deleted: 1,
            stragglers: 0
        }));
        assert!(!events
            .iter()
            .any(|e| matches!(e, JobEvent::BatchFinished { .. })));
    }

    #[test]
    fn new_batch_runs_after_abort() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.wav");
        let second = dir.path().join("second.wav");
        let io = MemoryIo::new(vec![
            (first.clone(), vec![0.5; 64]),
            (second.clone(), vec![0.1; 64]),
        ]);
        let mut settings = Settings::default();
        settings.processing.abort_grace_ms = 20_000;
        let (orch, _rx, gate) = gated(settings, io, 0.5);

        orch.add_job(&first);
        orch.start_all();
        assert!(wait_for(|| gate.waiting() == 1));
        let aborter = {
            let orch = orch.clone();
            thread::spawn(move || orch.abort_all())
        };
        assert!(wait_for(|| orch.is_aborting()));
        gate.open();
        aborter.join().unwrap();

        orch.add_job(&second);
        assert_eq!(orch.start_all(), 1);
        assert!(orch.wait_idle(TIMEOUT));
        assert_eq!(status_of(&orch, &second), JobStatus::Done);
        assert_eq!(status_of(&orch, &first), JobStatus::Cancelled);
    }

    #[test]
    fn failing_transform_passes_chunks_through() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("hiss.wav");
        let samples: Vec<f32> = (0..1_000).map(|i| i as f32 / 1_000.0).collect();
        let (orch, _rx) = JobOrchestrator::builder(Settings::default())
            .audio_io(MemoryIo::new(vec![(source.clone(), samples.clone())]))
            .transform(Arc::new(FailingTransform))
            .build();

        orch.add_job(&source);
        orch.start_all();
        assert!(orch.wait_idle(TIMEOUT));

        assert_eq!(status_of(&orch, &source), JobStatus::Done);
        let written = WavIo.load(&dir.path().join("hiss_cleaned.wav")).unwrap();
        assert_eq!(written.samples, samples);
    }

    #[test]
    fn write_failure_is_error_without_output() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("take.wav");
        let mut settings = Settings::default();
        settings.paths.output_folder = dir
            .path()
            .join("missing")
            .join("folder")
            .to_string_lossy()
            .into_owned();
        let (orch, _rx) = JobOrchestrator::builder(settings)
            .audio_io(MemoryIo::new(vec![(source.clone(), vec![0.1; 32])]))
            .transform(Arc::new(IdentityTransform))
            .build();

        orch.add_job(&source);
        orch.start_all();
        assert!(orch.wait_idle(TIMEOUT));

        let job = orch.job(&source).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error_message.unwrap().contains("Failed to write"));
        assert!(orch.tracked_outputs().is_empty());
    }

    #[test]
    fn output_never_replaces_queued_source() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("a.wav");
        let suffixed = dir.path().join("a_cleaned.wav");
        std::fs::write(&suffixed, b"earlier output").unwrap();
        let io = MemoryIo::new(vec![
            (plain.clone(), vec![0.1; 16]),
            (suffixed.clone(), vec![0.2; 16]),
        ]);
        let (orch, _rx) = JobOrchestrator::builder(Settings::default())
            .audio_io(io)
            .transform(Arc::new(IdentityTransform))
            .build();

        orch.add_job(&plain);
        orch.add_job(&suffixed);
        orch.start_all();
        assert!(orch.wait_idle(TIMEOUT));

        assert_eq!(status_of(&orch, &plain), JobStatus::Error);
        assert_eq!(status_of(&orch, &suffixed), JobStatus::Done);
        assert_eq!(std::fs::read(&suffixed).unwrap(), b"earlier output");
    }

    #[test]
    fn zero_length_file_completes() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("empty.wav");
        let (orch, _rx) = JobOrchestrator::builder(Settings::default())
            .audio_io(MemoryIo::new(vec![(source.clone(), Vec::new())]))
            .build();

        orch.add_job(&source);
        orch.start_all();
        assert!(orch.wait_idle(TIMEOUT));

        let job = orch.job(&source).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress, 1.0);
        assert!(WavIo
            .load(&dir.path().join("empty_cleaned.wav"))
            .unwrap()
            .samples
            .is_empty());
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let (orch, rx) = JobOrchestrator::builder(Settings::default()).build();
        assert!(orch.add_job("a.wav"));
        assert!(!orch.add_job("a.wav"));
        assert_eq!(orch.len(), 1);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn cancel_pending_is_noop_and_remove_succeeds() {
        let (orch, rx) = JobOrchestrator::builder(Settings::default()).build();
        let path = Path::new("a.wav");
        orch.add_job(path);

        assert!(!orch.cancel_job(path).unwrap());
        assert_eq!(status_of(&orch, path), JobStatus::Pending);
        assert_eq!(orch.pending_count(), 1);

        orch.remove_job(path).unwrap();
        assert!(orch.is_empty());
        assert_eq!(
            orch.remove_job(path),
            Err(OrchestratorError::unknown_job(path))
        );
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events.last(),
            Some(&JobEvent::Removed {
                path: path.to_path_buf()
            })
        );
    }

    #[test]
    fn removing_processing_job_cancels_it() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("busy.wav");
        let (orch, _rx, gate) = gated(
            Settings::default(),
            MemoryIo::new(vec![(source.clone(), vec![0.5; 64])]),
            0.5,
        );

        orch.add_job(&source);
        orch.start_all();
        assert!(wait_for(|| gate.waiting() == 1));

        assert_eq!(
            orch.remove_job(&source),
            Err(OrchestratorError::job_busy(&source))
        );
        assert_eq!(status_of(&orch, &source), JobStatus::Cancelled);
        gate.open();
        assert!(orch.wait_idle(TIMEOUT));

        orch.remove_job(&source).unwrap();
        assert!(orch.is_empty());
        assert!(!dir.path().join("busy_cleaned.wav").exists());
    }

    #[test]
    fn start_all_without_pending_is_noop() {
        let (orch, _rx) = JobOrchestrator::builder(Settings::default()).build();
        assert_eq!(orch.start_all(), 0);
        assert!(!orch.is_any_processing());
    }

    #[test]
    fn clear_finished_keeps_pending() {
        let dir = tempdir().unwrap();
        let done = dir.path().join("done.wav");
        let io = MemoryIo::new(vec![(done.clone(), vec![0.1; 16])]);
        let (orch, _rx) = JobOrchestrator::builder(Settings::default())
            .audio_io(io)
            .transform(Arc::new(IdentityTransform))
            .build();

        orch.add_job(&done);
        orch.start_all();
        assert!(orch.wait_idle(TIMEOUT));
        orch.add_job(dir.path().join("later.wav"));

        assert_eq!(orch.clear_finished(), 1);
        assert_eq!(orch.len(), 1);
        assert_eq!(orch.pending_count(), 1);
        assert!(dir.path().join("done_cleaned.wav").exists());
    }

    /// Queue a job, cancel and remove it while its worker is held, then
    /// queue and start it again. Returns once the old worker has exited
    /// and the new one is held on `second`.
    fn requeue_while_old_run_is_held(
        dir: &Path,
    ) -> (JobOrchestrator, PathBuf, Arc<Gate>) {
        crate::logging::init_test_tracing();
        let source = dir.join("take.wav");
        let first = Arc::new(Gate::default());
        let second = Arc::new(Gate::default());
        let (orch, _rx) = JobOrchestrator::builder(Settings::default())
            .audio_io(MemoryIo::new(vec![(source.clone(), vec![0.1; 64])]))
            .transform(Arc::new(TwoStageTransform {
                first: Arc::clone(&first),
                second: Arc::clone(&second),
                calls: AtomicUsize::new(0),
            }))
            .build();

        orch.add_job(&source);
        orch.start_all();
        assert!(wait_for(|| first.waiting() == 1));
        assert!(orch.cancel_job(&source).unwrap());
        orch.remove_job(&source).unwrap();
        assert!(orch.add_job(&source));
        assert_eq!(orch.start_all(), 1);
        assert!(wait_for(|| second.waiting() == 1));

        first.open();
        assert!(wait_for(|| orch.shared.workers.active() == 1));
        (orch, source, second)
    }

    #[test]
    fn old_run_leaves_requeued_job_alone() {
        let dir = tempdir().unwrap();
        let (orch, source, second) = requeue_while_old_run_is_held(dir.path());

        let job = orch.job(&source).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(!orch.shared.table.lock().get(&source).unwrap().cancel_requested);

        second.open();
        assert!(orch.wait_idle(TIMEOUT));
        let job = orch.job(&source).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress, 1.0);
        assert!(dir.path().join("take_cleaned.wav").exists());
        assert_eq!(outputs_in(dir.path()), vec!["take_cleaned.wav"]);
    }

    #[test]
    fn requeued_job_stays_cancellable_after_old_run_exits() {
        let dir = tempdir().unwrap();
        let (orch, source, second) = requeue_while_old_run_is_held(dir.path());

        assert!(orch.shared.registry.request_cancel(&source));
        second.open();
        assert!(orch.wait_idle(TIMEOUT));

        assert_eq!(status_of(&orch, &source), JobStatus::Cancelled);
        assert!(outputs_in(dir.path()).is_empty());
    }

    #[test]
    fn cancel_keeps_existing_file_at_output_path() {
        crate::logging::init_test_tracing();
        let dir = tempdir().unwrap();
        let source = dir.path().join("take.wav");
        let existing = dir.path().join("take_cleaned.wav");
        std::fs::write(&existing, b"keep me").unwrap();
        let gate = Arc::new(Gate::default());
        let io = Arc::new(HeldWriteIo {
            inner: MemoryIo::new(vec![(source.clone(), vec![0.1; 64])]),
            gate: Arc::clone(&gate),
            fail: false,
        });
        let (orch, _rx) = JobOrchestrator::builder(Settings::default())
            .audio_io(io)
            .transform(Arc::new(IdentityTransform))
            .build();

        orch.add_job(&source);
        orch.start_all();
        assert!(wait_for(|| gate.waiting() == 1));
        let job = orch.job(&source).unwrap();
        assert_eq!(job.output_path.as_deref(), Some(existing.as_path()));

        assert!(orch.cancel_job(&source).unwrap());
        assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");
        gate.open();
        assert!(orch.wait_idle(TIMEOUT));

        assert_eq!(status_of(&orch, &source), JobStatus::Cancelled);
        assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");
        assert_eq!(outputs_in(dir.path()), vec!["take_cleaned.wav"]);
    }

    #[test]
    fn failed_write_keeps_existing_file_at_output_path() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("take.wav");
        let existing = dir.path().join("take_cleaned.wav");
        std::fs::write(&existing, b"keep me").unwrap();
        let gate = Arc::new(Gate::default());
        gate.open();
        let io = Arc::new(HeldWriteIo {
            inner: MemoryIo::new(vec![(source.clone(), vec![0.1; 64])]),
            gate,
            fail: true,
        });
        let (orch, _rx) = JobOrchestrator::builder(Settings::default())
            .audio_io(io)
            .transform(Arc::new(IdentityTransform))
            .build();

        orch.add_job(&source);
        orch.start_all();
        assert!(orch.wait_idle(TIMEOUT));

        let job = orch.job(&source).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error_message.unwrap().contains("Failed to write"));
        assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");
        assert_eq!(outputs_in(dir.path()), vec!["take_cleaned.wav"]);
    }

    #[test]
    fn short_grace_abort_reports_straggler_and_discards_its_output() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("slow.wav");
        let mut settings = Settings::default();
        settings.processing.abort_grace_ms = 20;
        let (orch, rx, gate) = gated(
            settings,
            MemoryIo::new(vec![(source.clone(), vec![0.5; 64])]),
            0.5,
        );

        orch.add_job(&source);
        orch.start_all();
        assert!(wait_for(|| gate.waiting() == 1));

        let report = orch.abort_all();
        assert!(report.deleted.is_empty());
        assert_eq!(status_of(&orch, &source), JobStatus::Cancelled);
        assert!(!orch.is_aborting());
        let events: Vec<JobEvent> = rx.try_iter().collect();
        assert!(events.contains(&JobEvent::Aborted {
            deleted: 0,
            stragglers: 1
        }));

        gate.open();
        assert!(orch.wait_idle(TIMEOUT));
        assert_eq!(status_of(&orch, &source), JobStatus::Cancelled);
        assert!(orch.tracked_outputs().is_empty());
        assert!(outputs_in(dir.path()).is_empty());
    }

    #[test]
    fn many_jobs_with_cancels_settle_cleanly() {
        let dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..40)
            .map(|i| dir.path().join(format!("job_{:02}.wav", i)))
            .collect();
        let files = paths
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), vec![if i % 4 == 0 { 0.5 } else { 0.1 }; 256]))
            .collect();
        let (orch, _rx, gate) = gated(Settings::default(), MemoryIo::new(files), 0.5);

        for path in &paths {
            orch.add_job(path);
        }
        assert_eq!(orch.start_all(), 40);
        assert!(wait_for(|| gate.waiting() == 10));

        let mut cancelled = HashSet::new();
        for (i, path) in paths.iter().enumerate() {
            if (i % 8 == 0 || i % 5 == 1) && orch.cancel_job(path).unwrap() {
                cancelled.insert(path.clone());
            }
        }
        gate.open();
        assert!(orch.wait_idle(TIMEOUT));

        for (i, path) in paths.iter().enumerate() {
            let output = dir.path().join(format!("job_{:02}_cleaned.wav", i));
            if i % 8 == 0 {
                assert!(cancelled.contains(path));
            }
            if cancelled.contains(path) {
                assert_eq!(status_of(&orch, path), JobStatus::Cancelled);
                assert!(!output.exists());
            } else {
                assert_eq!(status_of(&orch, path), JobStatus::Done);
                assert!(output.exists());
            }
        }
        assert_eq!(outputs_in(dir.path()).len(), 40 - cancelled.len());
        assert!(wait_for(|| orch.tracked_outputs().is_empty()));
    }

    #[test]
    fn many_jobs_with_cancels_and_abort_leave_nothing() {
        let dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..32)
            .map(|i| dir.path().join(format!("job_{:02}.wav", i)))
            .collect();
        let files = paths
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), vec![if i % 3 == 0 { 0.5 } else { 0.1 }; 256]))
            .collect();
        let mut settings = Settings::default();
        settings.processing.abort_grace_ms = 20_000;
        let (orch, rx, gate) = gated(settings, MemoryIo::new(files), 0.5);

        for path in &paths {
            orch.add_job(path);
        }
        assert_eq!(orch.start_all(), 32);
        assert!(wait_for(|| gate.waiting() == 11));
        for path in paths.iter().step_by(6) {
            assert!(orch.cancel_job(path).unwrap());
        }

        let aborter = {
            let orch = orch.clone();
            thread::spawn(move || orch.abort_all())
        };
        assert!(wait_for(|| orch.is_aborting()));
        gate.open();
        let report = aborter.join().unwrap();
        assert!(orch.wait_idle(TIMEOUT));

        let jobs = orch.jobs();
        assert!(jobs.iter().all(|j| j.status.is_terminal()));
        for (i, path) in paths.iter().enumerate() {
            if i % 3 == 0 {
                assert_eq!(status_of(&orch, path), JobStatus::Cancelled);
            }
        }
        let done = jobs.iter().filter(|j| j.status == JobStatus::Done).count();
        assert_eq!(report.deleted.len(), done);
        assert!(report.failed.is_empty());
        assert!(outputs_in(dir.path()).is_empty());
        assert!(orch.tracked_outputs().is_empty());

        let events: Vec<JobEvent> = rx.try_iter().collect();
        assert!(events.contains(&JobEvent::Aborted {
            deleted: done,
            stragglers: 0
        }));
    }

    #[test]
    fn stop_when_idle_clears_queue() {
        let (orch, rx) = JobOrchestrator::builder(Settings::default()).build();
        orch.add_job("a.wav");
        orch.add_job("b.wav");

        assert_eq!(orch.stop_all(), StopOutcome::Cleared(2));
        assert!(orch.is_empty());
        let removed = rx
            .try_iter()
            .filter(|e| matches!(e, JobEvent::Removed { .. }))
            .count();
        assert_eq!(removed, 2);
    }

    #[test]
    fn stop_while_running_aborts() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("busy.wav");
        let mut settings = Settings::default();
        settings.processing.abort_grace_ms = 20_000;
        let (orch, _rx, gate) = gated(
            settings,
            MemoryIo::new(vec![(source.clone(), vec![0.5; 64])]),
            0.5,
        );

        orch.add_job(&source);
        orch.start_all();
        assert!(wait_for(|| gate.waiting() == 1));
        let stopper = {
            let orch = orch.clone();
            thread::spawn(move || orch.stop_all())
        };
        assert!(wait_for(|| orch.is_aborting()));
        gate.open();

        assert_eq!(
            stopper.join().unwrap(),
            StopOutcome::Aborted(DeleteReport::default())
        );
        assert_eq!(status_of(&orch, &source), JobStatus::Cancelled);
        assert_eq!(orch.len(), 1);
    }

    #[test]
    fn recent_completions_list_newest_first() {
        let dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = ["a", "b", "c"]
            .iter()
            .map(|n| dir.path().join(format!("{}.wav", n)))
            .collect();
        let failing = dir.path().join("missing.wav");
        let io = MemoryIo::new(paths.iter().map(|p| (p.clone(), vec![0.1; 16])).collect());
        let (orch, _rx) = JobOrchestrator::builder(Settings::default())
            .audio_io(io)
            .transform(Arc::new(IdentityTransform))
            .build();

        for path in &paths {
            orch.add_job(path);
        }
        orch.add_job(&failing);
        orch.start_all();
        assert!(orch.wait_idle(TIMEOUT));

        let recent: HashSet<PathBuf> = orch.recent_completions().into_iter().collect();
        assert_eq!(recent, paths.iter().cloned().collect());

        orch.remove_job(&paths[0]).unwrap();
        orch.add_job(&paths[0]);
        orch.start_all();
        assert!(orch.wait_idle(TIMEOUT));

        let recent = orch.recent_completions();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0], paths[0]);
    }
}
