//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use shopops_core::TenantId;

use super::types::{Job, JobId, JobKind, JobPatch, JobStatus};

/// Job store abstraction.
///
/// `update` applies a field-wise merge (partial update), never a full
/// overwrite, and rejects any status revision out of a terminal state.
/// Late counter merges from an in-flight sub-operation are still accepted
/// after the status went terminal.
pub trait JobStore: Send + Sync {
    /// Persist a new job record.
    fn create(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID, scoped to its tenant.
    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Merge a partial update into a job and return the merged record.
    fn update(&self, job_id: JobId, patch: JobPatch) -> Result<Job, JobStoreError>;

    /// List a tenant's jobs, oldest first.
    fn list(
        &self,
        tenant_id: TenantId,
        filter: JobFilter,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// List jobs stuck in `Processing` whose `started_at` is older than
    /// `cutoff` (reconciliation sweep; crosses tenant boundaries).
    fn list_stale(&self, cutoff: DateTime<Utc>, limit: usize)
    -> Result<Vec<Job>, JobStoreError>;
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn create(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).create(job)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(tenant_id, job_id)
    }

    fn update(&self, job_id: JobId, patch: JobPatch) -> Result<Job, JobStoreError> {
        (**self).update(job_id, patch)
    }

    fn list(
        &self,
        tenant_id: TenantId,
        filter: JobFilter,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        (**self).list(tenant_id, filter, limit)
    }

    fn list_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_stale(cutoff, limit)
    }
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("terminal status on job {0} cannot be revised")]
    TerminalStatus(JobId),
    #[error("illegal status transition on job {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("counter invariant violated: {0}")]
    Invariant(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
}

impl JobFilter {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.kind.as_ref().map_or(true, |k| &job.kind == k)
    }
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        match jobs.get(&job_id) {
            Some(job) if job.tenant_id == tenant_id => Ok(Some(job.clone())),
            Some(_) => Err(JobStoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn update(&self, job_id: JobId, patch: JobPatch) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        if let Some(next) = patch.status {
            if job.status.is_terminal() && next != job.status {
                return Err(JobStoreError::TerminalStatus(job_id));
            }
            if !job.status.can_transition(next) {
                return Err(JobStoreError::IllegalTransition {
                    job_id,
                    from: job.status,
                    to: next,
                });
            }
        }

        let mut merged = job.clone();
        patch.apply(&mut merged);
        merged
            .check_invariants()
            .map_err(|e| JobStoreError::Invariant(e.to_string()))?;

        *job = merged.clone();
        Ok(merged)
    }

    fn list(
        &self,
        tenant_id: TenantId,
        filter: JobFilter,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id && filter.matches(j))
            .cloned()
            .collect();

        result.sort_by_key(|j| j.created_at);
        result.truncate(limit);
        Ok(result)
    }

    fn list_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Processing
                    && j.started_at.map_or(false, |at| at < cutoff)
            })
            .cloned()
            .collect();

        result.sort_by_key(|j| j.started_at);
        result.truncate(limit);
        Ok(result)
    }
}
