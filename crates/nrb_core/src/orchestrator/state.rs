//! State shared between the orchestrator handle and its workers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::cancel::CancellationRegistry;
use super::events::JobEvent;
use super::tracker::OutputTracker;
use crate::audio::{AudioIo, NoiseTransform};
use crate::config::Settings;
use crate::jobs::{Job, JobStatus};

/// Terminal counts for the batch in flight.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct BatchCounts {
    pub done: usize,
    pub cancelled: usize,
    pub failed: usize,
}

/// Most recent completions kept by the table.
pub(crate) const RECENT_LIMIT: usize = 20;

/// Job table. Every mutation that consumers can observe emits its event
/// while the lock is held.
pub(crate) struct JobTable {
    pub jobs: Vec<Job>,
    pub counts: BatchCounts,
    /// Sources of completed jobs, newest first.
    pub recent: VecDeque<PathBuf>,
    /// Outputs claimed by live worker runs, keyed by output path.
    reservations: HashMap<PathBuf, u64>,
    next_run: u64,
    events: Sender<JobEvent>,
}

impl JobTable {
    pub fn new(events: Sender<JobEvent>) -> Self {
        Self {
            jobs: Vec::new(),
            counts: BatchCounts::default(),
            recent: VecDeque::new(),
            reservations: HashMap::new(),
            next_run: 0,
            events,
        }
    }

    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.jobs.iter().position(|j| j.path == path)
    }

    pub fn get(&self, path: &Path) -> Option<&Job> {
        self.jobs.iter().find(|j| j.path == path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.path == path)
    }

    pub fn any_processing(&self) -> bool {
        self.jobs.iter().any(|j| j.status == JobStatus::Processing)
    }

    /// Move a pending job to processing under a fresh run id.
    pub fn begin(&mut self, path: &Path) -> Option<u64> {
        let run = self.next_run + 1;
        let job = self.get_mut(path)?;
        if !job.begin(run) {
            return None;
        }
        self.next_run = run;
        Some(run)
    }

    /// True if `run` is the job's current run.
    pub fn owns(&self, path: &Path, run: u64) -> bool {
        self.get(path).is_some_and(|j| j.run == run)
    }

    /// True if `run` owns the job and it is still processing.
    pub fn is_running(&self, path: &Path, run: u64) -> bool {
        self.get(path)
            .is_some_and(|j| j.run == run && j.status == JobStatus::Processing)
    }

    /// Paths an output of `path` must not take: every queued source, every
    /// other job's output and every output claimed by another live run.
    pub fn reserved_paths(&self, path: &Path, run: u64) -> HashSet<PathBuf> {
        let mut taken: HashSet<PathBuf> = self.jobs.iter().map(|j| j.path.clone()).collect();
        taken.extend(
            self.jobs
                .iter()
                .filter(|j| j.path != path)
                .filter_map(|j| j.output_path.clone()),
        );
        taken.extend(
            self.reservations
                .iter()
                .filter(|(_, owner)| **owner != run)
                .map(|(output, _)| output.clone()),
        );
        taken
    }

    pub fn reserve(&mut self, output: PathBuf, run: u64) {
        self.reservations.insert(output, run);
    }

    /// Drop every output claimed by `run`.
    pub fn release(&mut self, run: u64) {
        self.reservations.retain(|_, owner| *owner != run);
    }

    /// Put `path` at the front of the recent completions.
    pub fn record_completion(&mut self, path: &Path) {
        self.recent.retain(|p| p != path);
        self.recent.push_front(path.to_path_buf());
        self.recent.truncate(RECENT_LIMIT);
    }

    pub fn emit(&self, event: JobEvent) {
        // The consumer may have gone away; jobs keep running regardless.
        let _ = self.events.send(event);
    }

    /// Move a job to `status` if allowed and publish it.
    ///
    /// Returns true if the status changed.
    pub fn set_status(&mut self, path: &Path, status: JobStatus, message: Option<String>) -> bool {
        let Some(job) = self.get_mut(path) else {
            return false;
        };
        if !job.transition(status) {
            return false;
        }
        if status == JobStatus::Error {
            job.error_message = message.clone();
        }
        match status {
            JobStatus::Done => self.counts.done += 1,
            JobStatus::Cancelled => self.counts.cancelled += 1,
            JobStatus::Error => self.counts.failed += 1,
            _ => {}
        }
        self.emit(JobEvent::Status {
            path: path.to_path_buf(),
            status,
            message,
        });
        true
    }

    /// Raise the progress of a job still processing under `run` and
    /// publish it.
    ///
    /// Lower values, other runs and non-processing jobs are ignored.
    pub fn set_progress(&mut self, path: &Path, run: u64, progress: f64) -> bool {
        let Some(job) = self.get_mut(path) else {
            return false;
        };
        if job.run != run || job.status != JobStatus::Processing || progress < job.progress {
            return false;
        }
        job.progress = progress.clamp(0.0, 1.0);
        let progress = job.progress;
        self.emit(JobEvent::Progress {
            path: path.to_path_buf(),
            progress,
        });
        true
    }
}

/// Counter of running workers that can be waited on.
#[derive(Debug, Default)]
pub(crate) struct WaitGroup {
    count: Mutex<usize>,
    idle: Condvar,
}

impl WaitGroup {
    pub fn add(&self) {
        *self.count.lock() += 1;
    }

    /// Mark one worker finished. Returns true if it was the last.
    pub fn done(&self) -> bool {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
            true
        } else {
            false
        }
    }

    pub fn active(&self) -> usize {
        *self.count.lock()
    }

    /// Block until no worker is running or `timeout` elapses.
    ///
    /// Returns true if idle.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

/// Everything an orchestrator handle and its workers share.
pub(crate) struct Shared {
    pub settings: Settings,
    pub audio_io: Arc<dyn AudioIo>,
    pub transform: Arc<dyn NoiseTransform>,
    pub log_dir: Option<PathBuf>,
    pub table: Mutex<JobTable>,
    pub registry: CancellationRegistry,
    pub tracker: OutputTracker,
    pub workers: WaitGroup,
    pub aborting: AtomicBool,
}

impl Shared {
    pub fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::SeqCst)
    }

    /// Called by each worker after its terminal commit.
    ///
    /// The last worker of a batch that was not aborted keeps the batch's
    /// outputs and announces the totals. The count drops under the table
    /// lock, where `aborting` is also set and cleared.
    pub fn worker_finished(&self) {
        let mut table = self.table.lock();
        if !self.workers.done() || self.is_aborting() {
            return;
        }
        self.tracker.clear();
        let counts = std::mem::take(&mut table.counts);
        tracing::info!(
            "Batch finished: {} done, {} cancelled, {} failed",
            counts.done,
            counts.cancelled,
            counts.failed
        );
        table.emit(JobEvent::BatchFinished {
            done: counts.done,
            cancelled: counts.cancelled,
            failed: counts.failed,
        });
    }
}
