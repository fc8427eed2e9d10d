//! Cooperative cancellation tokens, one per running job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use shopops_jobs::JobId;

/// Cancellation flag threaded through the bulk loop.
///
/// Flipping it never interrupts an in-flight call; the loop observes it at
/// the top of the next iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Instance-owned token registry (no global mutable state).
///
/// `cancel` creates the token when none is registered yet, so a cancel that
/// races the start of the bulk loop is still observed.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<JobId, CancelToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the token for a job.
    pub fn register(&self, job_id: JobId) -> CancelToken {
        self.tokens
            .lock()
            .unwrap()
            .entry(job_id)
            .or_default()
            .clone()
    }

    pub fn cancel(&self, job_id: JobId) {
        self.register(job_id).cancel();
    }

    /// Drop the entry once the job's loop has finished.
    pub fn remove(&self, job_id: JobId) {
        self.tokens.lock().unwrap().remove(&job_id);
    }
}
