//! In-process bulk loop with per-item failure isolation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info};

use chrono::Utc;
use shopops_jobs::{
    BatchItemResult, ErrorLogEntry, Job, JobPatch, JobStatus, JobStore, JobStoreError,
};

use crate::cancel::CancelToken;
use crate::provider::{BulkItem, ContentProvider};

/// Executes a bulk job's sub-items strictly sequentially.
///
/// Each item runs inside its own isolation boundary: a provider failure is
/// folded into the error log and counters, never aborting the batch. After
/// every item the updated counters are persisted so observers see live
/// progress. A fixed inter-item delay protects the upstream capability from
/// burst load; it is not adaptive.
pub struct BulkRunner {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn ContentProvider>,
    inter_item_delay: Duration,
}

impl BulkRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn ContentProvider>,
        inter_item_delay: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            inter_item_delay,
        }
    }

    /// Run the batch to the end and return the final job record.
    ///
    /// `Completed` means the batch ran to the end with results recorded,
    /// **not** that every item succeeded. The job goes `Failed` only when an
    /// error escapes the per-item boundary (progress cannot be persisted)
    /// or when zero items ever succeeded.
    pub async fn run(
        &self,
        job: &Job,
        items: Vec<BulkItem>,
        token: CancelToken,
    ) -> Result<Job, JobStoreError> {
        let job_id = job.id;
        let tenant_id = job.tenant_id;
        let total = items.len() as u32;

        self.store.update(
            job_id,
            JobPatch::new()
                .with_status(JobStatus::Processing)
                .with_started_at(Utc::now())
                .with_total_items(total),
        )?;
        info!(job_id = %job_id, tenant_id = %tenant_id, total, "bulk run started");

        let mut processed = 0u32;
        let mut success = 0u32;
        let mut failed = 0u32;

        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                sleep(self.inter_item_delay).await;
            }

            // Cooperative cancellation, checked before each item. An
            // in-flight call for the current item is never aborted.
            match self.observe_cancellation(job, &token)? {
                CancelState::Cancelled => {
                    info!(job_id = %job_id, processed, "bulk run stopped by cancellation");
                    return self.current(job);
                }
                CancelState::RecordGone => {
                    debug!(job_id = %job_id, "job record disappeared, stopping bulk run");
                    return Ok(job.clone());
                }
                CancelState::Running => {}
            }

            let result = match self.provider.generate(tenant_id, item).await {
                Ok(content) => BatchItemResult::success(&item.item_ref, content.content),
                Err(e) => BatchItemResult::failure(&item.item_ref, e.to_string()),
            };

            processed += 1;
            let mut patch = JobPatch::new();
            match &result.outcome {
                Ok(_) => success += 1,
                Err(message) => {
                    failed += 1;
                    patch = patch.with_error(ErrorLogEntry::new(&result.item_ref, message));
                }
            }
            patch = patch.with_counters(processed, success, failed);

            debug!(
                job_id = %job_id,
                item_ref = %result.item_ref,
                succeeded = result.succeeded(),
                processed,
                "bulk item finished"
            );

            // Incremental visibility: persist after every item.
            if let Err(e) = self.store.update(job_id, patch) {
                error!(job_id = %job_id, error = %e, "failed to persist bulk progress");
                let _ = self.store.update(
                    job_id,
                    JobPatch::new()
                        .with_status(JobStatus::Failed)
                        .with_completed_at(Utc::now())
                        .with_error(ErrorLogEntry::new(
                            "batch",
                            format!("progress could not be persisted: {e}"),
                        )),
                );
                return Err(e);
            }
        }

        let final_status = if processed > 0 && success == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        let finished = self.store.update(
            job_id,
            JobPatch::new()
                .with_status(final_status)
                .with_completed_at(Utc::now()),
        );

        match finished {
            Ok(record) => {
                info!(
                    job_id = %job_id,
                    status = %record.status,
                    success,
                    failed,
                    total,
                    "bulk run finished"
                );
                Ok(record)
            }
            // A cancel landed between the last item and this write; the
            // terminal status it set stands.
            Err(JobStoreError::TerminalStatus(_)) => self.current(job),
            Err(e) => Err(e),
        }
    }

    /// Bridge the persisted `cancel_requested` flag into the token using the
    /// same lightweight read already used for progress.
    fn observe_cancellation(
        &self,
        job: &Job,
        token: &CancelToken,
    ) -> Result<CancelState, JobStoreError> {
        if token.is_cancelled() {
            return Ok(CancelState::Cancelled);
        }
        match self.store.get(job.tenant_id, job.id)? {
            Some(current) if current.cancel_requested => {
                token.cancel();
                Ok(CancelState::Cancelled)
            }
            Some(_) => Ok(CancelState::Running),
            None => Ok(CancelState::RecordGone),
        }
    }

    fn current(&self, job: &Job) -> Result<Job, JobStoreError> {
        self.store
            .get(job.tenant_id, job.id)?
            .ok_or(JobStoreError::NotFound(job.id))
    }
}

enum CancelState {
    Running,
    Cancelled,
    RecordGone,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use shopops_core::TenantId;
    use shopops_jobs::{InMemoryJobStore, JobKind};

    use crate::provider::{GeneratedContent, ProviderError};

    /// Provider scripted per item ref: refs listed in `failing` fail.
    struct ScriptedProvider {
        failing: Vec<String>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(failing: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentProvider for ScriptedProvider {
        async fn generate(
            &self,
            _tenant_id: TenantId,
            item: &BulkItem,
        ) -> Result<GeneratedContent, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&item.item_ref) {
                Err(ProviderError::Failed("model returned garbage".into()))
            } else {
                Ok(GeneratedContent::new(json!({"description": "fresh copy"})))
            }
        }
    }

    fn setup(provider: Arc<dyn ContentProvider>) -> (Arc<InMemoryJobStore>, BulkRunner, Job) {
        let store = InMemoryJobStore::arc();
        let runner = BulkRunner::new(store.clone(), provider, Duration::from_millis(600));
        let job = Job::new(
            TenantId::new(),
            JobKind::bulk_content(),
            json!({"items": []}),
        );
        store.create(job.clone()).unwrap();
        (store, runner, job)
    }

    fn items(n: usize) -> Vec<BulkItem> {
        (1..=n)
            .map(|i| BulkItem::new(format!("item:{i}"), serde_json::Value::Null))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn all_items_succeed() {
        let provider = ScriptedProvider::new(&[]);
        let (_store, runner, job) = setup(provider.clone());

        let finished = runner
            .run(&job, items(3), CancelToken::new())
            .await
            .unwrap();

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.total_items, 3);
        assert_eq!(finished.processed_items, 3);
        assert_eq!(finished.success_items, 3);
        assert_eq!(finished.failed_items, 0);
        assert!(finished.error_log.is_empty());
        assert!(finished.completed_at.is_some());
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn item_failure_is_isolated() {
        // Scenario: 5 items, #3 fails, batch still completes.
        let provider = ScriptedProvider::new(&["item:3"]);
        let (_store, runner, job) = setup(provider);

        let finished = runner
            .run(&job, items(5), CancelToken::new())
            .await
            .unwrap();

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.success_items, 4);
        assert_eq!(finished.failed_items, 1);
        assert_eq!(finished.processed_items, 5);
        assert_eq!(finished.error_log.len(), 1);
        assert_eq!(finished.error_log[0].item_ref, "item:3");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_successes_fail_the_batch() {
        let provider = ScriptedProvider::new(&["item:1", "item:2"]);
        let (_store, runner, job) = setup(provider);

        let finished = runner
            .run(&job, items(2), CancelToken::new())
            .await
            .unwrap();

        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.failed_items, 2);
        assert_eq!(finished.error_log.len(), 2);
    }

    /// Provider exhausting its upstream budget partway through the batch.
    struct ThrottledProvider;

    #[async_trait]
    impl ContentProvider for ThrottledProvider {
        async fn generate(
            &self,
            _tenant_id: TenantId,
            item: &BulkItem,
        ) -> Result<GeneratedContent, ProviderError> {
            match item.item_ref.as_str() {
                "item:1" => Err(ProviderError::RateLimited("429 from upstream".into())),
                "item:2" => Err(ProviderError::QuotaExceeded("monthly quota spent".into())),
                _ => Ok(GeneratedContent::new(json!({"description": "fresh copy"}))),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_errors_are_per_item_failures() {
        // Rate-limit and quota errors from the provider stay inside the
        // item's isolation boundary like any other failure.
        let (_store, runner, job) = setup(Arc::new(ThrottledProvider));

        let finished = runner
            .run(&job, items(3), CancelToken::new())
            .await
            .unwrap();

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.processed_items, 3);
        assert_eq!(finished.success_items, 1);
        assert_eq!(finished.failed_items, 2);
        assert_eq!(finished.error_log.len(), 2);
        assert!(finished.error_log[0].message.contains("rate-limited"));
        assert!(finished.error_log[1].message.contains("quota exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_completes() {
        let provider = ScriptedProvider::new(&[]);
        let (_store, runner, job) = setup(provider);

        let finished = runner
            .run(&job, items(0), CancelToken::new())
            .await
            .unwrap();

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.processed_items, 0);
    }

    /// Provider that snapshots the persisted counter before each call,
    /// proving incremental visibility between items.
    struct SnapshottingProvider {
        store: Arc<InMemoryJobStore>,
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl ContentProvider for SnapshottingProvider {
        async fn generate(
            &self,
            tenant_id: TenantId,
            _item: &BulkItem,
        ) -> Result<GeneratedContent, ProviderError> {
            // The run is sequential, so there is exactly one job.
            let all = self
                .store
                .list(tenant_id, shopops_jobs::JobFilter::default(), 10)
                .unwrap();
            self.seen
                .lock()
                .unwrap()
                .extend(all.iter().map(|j| j.processed_items));
            Ok(GeneratedContent::new(serde_json::Value::Null))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_persisted_after_every_item() {
        let store = InMemoryJobStore::arc();
        let provider = Arc::new(SnapshottingProvider {
            store: store.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let runner = BulkRunner::new(store.clone(), provider.clone(), Duration::from_millis(600));

        let job = Job::new(TenantId::new(), JobKind::bulk_content(), json!({}));
        store.create(job.clone()).unwrap();

        runner.run(&job, items(3), CancelToken::new()).await.unwrap();

        // Before items 1, 2 and 3 the persisted counters were 0, 1, 2.
        assert_eq!(*provider.seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_job_is_not_revived() {
        let provider = ScriptedProvider::new(&[]);
        let (store, runner, job) = setup(provider.clone());

        // Simulate the launcher's cancel: flag + terminal status.
        store
            .update(
                job.id,
                JobPatch::new().with_status(JobStatus::Processing),
            )
            .unwrap();
        store
            .update(
                job.id,
                JobPatch::new()
                    .with_status(JobStatus::Failed)
                    .with_cancel_requested(true),
            )
            .unwrap();

        // Processing was already left behind; run() must not revive it.
        let finished = runner.run(&job, items(4), CancelToken::new()).await;
        // The Processing transition is rejected because the job is terminal.
        assert!(finished.is_err());
        assert_eq!(provider.calls(), 0);
    }

    /// Provider that cancels the token while handling its first item.
    struct CancellingProvider {
        token: CancelToken,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ContentProvider for CancellingProvider {
        async fn generate(
            &self,
            _tenant_id: TenantId,
            _item: &BulkItem,
        ) -> Result<GeneratedContent, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.token.cancel();
            Ok(GeneratedContent::new(serde_json::Value::Null))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_before_the_next_item() {
        let token = CancelToken::new();
        let provider = Arc::new(CancellingProvider {
            token: token.clone(),
            calls: AtomicU32::new(0),
        });
        let store = InMemoryJobStore::arc();
        let runner = BulkRunner::new(store.clone(), provider.clone(), Duration::from_millis(600));

        let job = Job::new(TenantId::new(), JobKind::bulk_content(), json!({}));
        store.create(job.clone()).unwrap();

        let finished = runner.run(&job, items(5), token).await.unwrap();

        // Item 1 completed (cancel cannot abort an in-flight call), items
        // 2..5 were never attempted; status stays whatever it already was.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(finished.processed_items, 1);
        assert_eq!(finished.status, JobStatus::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn persisted_flag_bridges_into_the_token() {
        let provider = ScriptedProvider::new(&[]);
        let store = InMemoryJobStore::arc();
        let runner = BulkRunner::new(store.clone(), provider.clone(), Duration::from_millis(600));

        let job = Job::new(TenantId::new(), JobKind::bulk_content(), json!({}));
        store.create(job.clone()).unwrap();
        store
            .update(job.id, JobPatch::new().with_cancel_requested(true))
            .unwrap();

        let token = CancelToken::new();
        let finished = runner.run(&job, items(3), token.clone()).await.unwrap();

        assert!(token.is_cancelled());
        assert_eq!(provider.calls(), 0);
        assert_eq!(finished.processed_items, 0);
    }
}
