//! Cooperative cancellation.
//!
//! Each batch has one parent token; every job started in that batch gets
//! a child. Cancelling the parent (global abort) cancels all children,
//! cancelling a child affects only that job. Workers poll between chunks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Cloneable cancellation flag with an optional parent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    /// Create a root token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token cancelled by its own flag or by any ancestor.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check this token and its ancestors.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    batch: CancelToken,
    /// Token of each job's current run, tagged with the run id.
    jobs: HashMap<PathBuf, (u64, CancelToken)>,
}

/// Per-job cancel flags plus the global abort flag.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    state: Mutex<RegistryState>,
}

impl CancellationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for run `run` of a job.
    ///
    /// Replaces any previous token, clearing its per-job flag.
    pub fn register(&self, job: &Path, run: u64) -> CancelToken {
        let mut state = self.state.lock();
        let token = state.batch.child();
        state.jobs.insert(job.to_path_buf(), (run, token.clone()));
        token
    }

    /// Set the per-job flag. Returns false if the job holds no token.
    pub fn request_cancel(&self, job: &Path) -> bool {
        match self.state.lock().jobs.get(job) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Set the global abort flag. Idempotent.
    pub fn request_global_abort(&self) {
        self.state.lock().batch.cancel();
    }

    /// True if the job's flag or the global flag is set.
    pub fn is_cancelled(&self, job: &Path) -> bool {
        let state = self.state.lock();
        match state.jobs.get(job) {
            Some((_, token)) => token.is_cancelled(),
            None => state.batch.is_cancelled(),
        }
    }

    /// Whether the current batch is aborted.
    pub fn is_global_abort(&self) -> bool {
        self.state.lock().batch.is_cancelled()
    }

    /// Clear the global flag for the next batch.
    ///
    /// Tokens handed out under an aborted batch stay cancelled.
    pub fn reset_for_new_batch(&self) {
        let mut state = self.state.lock();
        if state.batch.is_cancelled() {
            state.batch = CancelToken::new();
        }
    }

    /// Drop the token of a removed job.
    pub fn forget(&self, job: &Path) {
        self.state.lock().jobs.remove(job);
    }

    /// Drop the job's token only if it still belongs to `run`.
    pub fn forget_run(&self, job: &Path, run: u64) {
        let mut state = self.state.lock();
        if state.jobs.get(job).is_some_and(|(owner, _)| *owner == run) {
            state.jobs.remove(job);
        }
    }
}
