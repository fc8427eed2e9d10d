//! Reconciliation for jobs stuck in `processing`.
//!
//! A crashed worker or lost adapter leaves a job `processing` forever; no
//! monitor outlives its poll budget to notice. The sweeper periodically
//! marks such jobs failed so operators and retries can act on them. It
//! writes to the store only; terminal notifications stay with the per-job
//! monitor, so a sweep never double-announces a job that something is still
//! watching.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use chrono::Utc;
use shopops_jobs::{ErrorLogEntry, JobId, JobPatch, JobStatus, JobStore, JobStoreError};

use crate::config::OrchestratorConfig;

const SWEEP_BATCH: usize = 100;

pub struct StalenessSweeper {
    store: Arc<dyn JobStore>,
    stale_after: Duration,
    sweep_interval: Duration,
}

impl StalenessSweeper {
    pub fn new(store: Arc<dyn JobStore>, stale_after: Duration, sweep_interval: Duration) -> Self {
        Self {
            store,
            stale_after,
            sweep_interval,
        }
    }

    pub fn from_config(store: Arc<dyn JobStore>, config: &OrchestratorConfig) -> Self {
        Self::new(store, config.stale_after, config.sweep_interval)
    }

    /// One pass: fail every job that has been `processing` past the
    /// staleness horizon. Returns the ids that were marked.
    pub fn sweep_once(&self) -> Result<Vec<JobId>, JobStoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.stale_after)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
        let stale = self.store.list_stale(cutoff, SWEEP_BATCH)?;

        let mut swept = Vec::with_capacity(stale.len());
        for job in stale {
            let minutes = self.stale_after.as_secs() / 60;
            let patch = JobPatch::new()
                .with_status(JobStatus::Failed)
                .with_completed_at(Utc::now())
                .with_error(ErrorLogEntry::new(
                    "sweeper",
                    format!("no progress for over {minutes} minutes, marked as stalled"),
                ));
            match self.store.update(job.id, patch) {
                Ok(_) => {
                    info!(job_id = %job.id, tenant_id = %job.tenant_id, "stale job marked failed");
                    swept.push(job.id);
                }
                // Finished between the listing and the write; nothing to do.
                Err(JobStoreError::TerminalStatus(_)) => {}
                Err(e) => warn!(job_id = %job.id, error = %e, "sweep update failed"),
            }
        }
        Ok(swept)
    }

    /// Run sweeps on a fixed schedule until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh process
            // does not sweep before anything can possibly be stale.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once() {
                    warn!(error = %e, "sweep pass failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use shopops_core::TenantId;
    use shopops_jobs::{InMemoryJobStore, Job, JobKind};

    fn processing_job(store: &InMemoryJobStore, started_secs_ago: i64) -> Job {
        let job = Job::new(TenantId::new(), JobKind::bulk_content(), json!({}));
        store.create(job.clone()).unwrap();
        store
            .update(
                job.id,
                JobPatch::new()
                    .with_status(JobStatus::Processing)
                    .with_started_at(Utc::now() - chrono::Duration::seconds(started_secs_ago)),
            )
            .unwrap();
        job
    }

    #[test]
    fn stale_jobs_are_failed_with_a_sweeper_entry() {
        let store = InMemoryJobStore::arc();
        let stale = processing_job(&store, 2 * 3600);
        let fresh = processing_job(&store, 30);

        let sweeper = StalenessSweeper::new(
            store.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(300),
        );
        let swept = sweeper.sweep_once().unwrap();

        assert_eq!(swept, vec![stale.id]);
        let stale_now = store.get(stale.tenant_id, stale.id).unwrap().unwrap();
        assert_eq!(stale_now.status, JobStatus::Failed);
        let entry = stale_now.first_error().unwrap();
        assert_eq!(entry.item_ref, "sweeper");
        assert!(entry.message.contains("60 minutes"));

        let fresh_now = store.get(fresh.tenant_id, fresh.id).unwrap().unwrap();
        assert_eq!(fresh_now.status, JobStatus::Processing);
    }

    #[test]
    fn terminal_jobs_are_skipped_without_error() {
        let store = InMemoryJobStore::arc();
        let job = processing_job(&store, 2 * 3600);
        store
            .update(job.id, JobPatch::new().with_status(JobStatus::Completed))
            .unwrap();

        let sweeper = StalenessSweeper::new(
            store.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(300),
        );
        let swept = sweeper.sweep_once().unwrap();
        assert!(swept.is_empty());
    }

    #[test]
    fn a_quiet_store_sweeps_nothing() {
        let store = InMemoryJobStore::arc();
        let sweeper = StalenessSweeper::new(
            store,
            Duration::from_secs(3600),
            Duration::from_secs(300),
        );
        assert!(sweeper.sweep_once().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_sweeps_fire_on_the_interval() {
        let store = InMemoryJobStore::arc();
        let job = processing_job(&store, 2 * 3600);

        let sweeper =
            StalenessSweeper::from_config(store.clone(), &OrchestratorConfig::default());
        let handle = sweeper.spawn();

        tokio::time::sleep(Duration::from_secs(301)).await;
        let current = store.get(job.tenant_id, job.id).unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Failed);

        handle.abort();
    }
}
