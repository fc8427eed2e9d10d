//! The orchestrator facade: admission, creation, enqueue, cancel, retry.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use chrono::Utc;
use shopops_core::TenantId;
use shopops_jobs::{
    ErrorLogEntry, Job, JobId, JobKind, JobPatch, JobStatus, JobStore, JobStoreError,
};
use shopops_ratelimit::{RateLimitDecision, RateLimiter};

use crate::adapter::AdapterRegistry;
use crate::bulk::BulkRunner;
use crate::cancel::CancelRegistry;
use crate::config::OrchestratorConfig;
use crate::dispatch::{DispatchRequest, DispatchWorker};
use crate::monitor::StatusMonitor;
use crate::notify::{Notification, NotificationBus};
use crate::provider::{BulkItem, ContentProvider};

/// What a caller submits to `start_job`.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub tenant_id: TenantId,
    pub kind: JobKind,
    pub config: serde_json::Value,
}

impl JobRequest {
    pub fn new(tenant_id: TenantId, kind: JobKind, config: serde_json::Value) -> Self {
        Self {
            tenant_id,
            kind,
            config,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("invalid job request: {0}")]
    Validation(String),
    /// Rejected by admission control. No job record exists.
    #[error("rate limit exceeded for {action}: retry in {}", decision.reset_countdown())]
    RateLimited {
        action: String,
        decision: RateLimitDecision,
    },
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("dispatch queue is closed")]
    QueueClosed,
}

/// Result of a cancellation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The job was not in a cancellable state; carries what it was.
    NotCancellable(JobStatus),
}

/// Entry point for launching and steering jobs.
///
/// Owns the dispatch queue, the per-instance monitor registry and the
/// cancellation registry. Admission control runs before any job record is
/// created, so a rejected request leaves no trace beyond a notification.
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    limiter: RateLimiter,
    bus: Arc<dyn NotificationBus>,
    monitor: Arc<StatusMonitor>,
    cancellations: Arc<CancelRegistry>,
    queue: mpsc::Sender<DispatchRequest>,
    worker: JoinHandle<()>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        limiter: RateLimiter,
        registry: Arc<AdapterRegistry>,
        provider: Arc<dyn ContentProvider>,
        bus: Arc<dyn NotificationBus>,
        config: OrchestratorConfig,
    ) -> Self {
        let cancellations = Arc::new(CancelRegistry::new());
        let bulk_runner = BulkRunner::new(store.clone(), provider, config.inter_item_delay);
        let (queue, rx) = mpsc::channel(config.dispatch_queue_depth);
        let worker =
            DispatchWorker::new(store.clone(), registry, bulk_runner, cancellations.clone())
                .spawn(rx);
        let monitor = StatusMonitor::new(store.clone(), bus.clone(), config);

        Self {
            store,
            limiter,
            bus,
            monitor,
            cancellations,
            queue,
            worker,
        }
    }

    pub fn monitor(&self) -> &Arc<StatusMonitor> {
        &self.monitor
    }

    /// Validate, admit, create and enqueue a job.
    ///
    /// Returns as soon as the job record exists and is queued; execution and
    /// completion surface through the job record and the notification bus.
    pub async fn start_job(&self, request: JobRequest) -> Result<JobId, LaunchError> {
        validate(&request)?;

        let action = request.kind.action().to_string();
        let decision = self.limiter.check(request.tenant_id, &action);
        if !decision.allowed {
            warn!(
                tenant_id = %request.tenant_id,
                action,
                current = decision.current_count,
                max = decision.max_requests,
                "job rejected by admission control"
            );
            self.bus.publish(Notification::RateLimitRejected {
                tenant_id: request.tenant_id,
                action: action.clone(),
                decision: decision.clone(),
            });
            return Err(LaunchError::RateLimited { action, decision });
        }

        let job = Job::new(request.tenant_id, request.kind, request.config);
        let job_id = self.store.create(job.clone())?;
        let tenant_id = job.tenant_id;

        if self.queue.send(DispatchRequest { job }).await.is_err() {
            // Shutdown raced the launch. Leave an honest record behind.
            let patch = JobPatch::new()
                .with_status(JobStatus::Failed)
                .with_completed_at(Utc::now())
                .with_error(ErrorLogEntry::new("dispatch", "dispatch queue closed"));
            if let Err(e) = self.store.update(job_id, patch) {
                warn!(job_id = %job_id, error = %e, "could not record queue closure");
            }
            return Err(LaunchError::QueueClosed);
        }

        self.monitor.start(tenant_id, job_id);
        self.bus.publish(Notification::JobStarted {
            job_id,
            tenant_id,
            action,
        });
        info!(job_id = %job_id, tenant_id = %tenant_id, "job accepted");
        Ok(job_id)
    }

    /// Request cooperative cancellation of a running job.
    ///
    /// Only `processing` jobs can be cancelled. The in-flight item always
    /// finishes; the loop observes the token before starting the next one.
    pub fn cancel_job(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<CancelOutcome, JobStoreError> {
        let job = self
            .store
            .get(tenant_id, job_id)?
            .ok_or(JobStoreError::NotFound(job_id))?;

        if job.status != JobStatus::Processing {
            return Ok(CancelOutcome::NotCancellable(job.status));
        }

        self.cancellations.cancel(job_id);

        let patch = JobPatch::new()
            .with_cancel_requested(true)
            .with_status(JobStatus::Failed)
            .with_completed_at(Utc::now())
            .with_error(ErrorLogEntry::new("operator", "cancelled by operator"));
        match self.store.update(job_id, patch) {
            Ok(_) => {
                info!(job_id = %job_id, "job cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            Err(JobStoreError::TerminalStatus(_)) => {
                // The job finished on its own while we were cancelling.
                let current = self
                    .store
                    .get(tenant_id, job_id)?
                    .ok_or(JobStoreError::NotFound(job_id))?;
                Ok(CancelOutcome::NotCancellable(current.status))
            }
            Err(e) => Err(e),
        }
    }

    /// Resubmit a failed job's kind and config as a brand-new job.
    ///
    /// The original record is left untouched; the new run gets a fresh id,
    /// fresh counters and its own pass through admission control.
    pub async fn retry_job(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<JobId, LaunchError> {
        let job = self
            .store
            .get(tenant_id, job_id)
            .map_err(LaunchError::Store)?
            .ok_or(LaunchError::Store(JobStoreError::NotFound(job_id)))?;

        if job.status != JobStatus::Failed {
            return Err(LaunchError::Validation(format!(
                "only failed jobs can be retried, job is {}",
                job.status
            )));
        }

        self.start_job(JobRequest::new(tenant_id, job.kind.clone(), job.config.clone()))
            .await
    }

    /// Close the queue and wait for in-flight dispatches to finish.
    pub async fn shutdown(self) {
        drop(self.queue);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "dispatch worker did not shut down cleanly");
        }
    }
}

fn validate(request: &JobRequest) -> Result<(), LaunchError> {
    match &request.kind {
        JobKind::Import { .. } => {
            let url = request
                .config
                .get("source_url")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if url.trim().is_empty() {
                return Err(LaunchError::Validation(
                    "import jobs require a non-empty source_url".into(),
                ));
            }
        }
        JobKind::BulkContent => {
            let items = BulkItem::parse_items(&request.config)
                .map_err(LaunchError::Validation)?;
            if items.is_empty() {
                return Err(LaunchError::Validation(
                    "bulk jobs require at least one item".into(),
                ));
            }
        }
        JobKind::Custom { .. } => {}
    }
    Ok(())
}
