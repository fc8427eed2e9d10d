//! Queue-backed dispatch from accepted jobs to their executors.
//!
//! Launch and execution are decoupled through a bounded channel: the
//! launcher enqueues and returns, a single worker task drains the queue and
//! routes each job by kind. Import jobs hand off to a registered source
//! adapter; bulk content jobs run in-process through the `BulkRunner`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chrono::Utc;
use shopops_jobs::{ErrorLogEntry, Job, JobPatch, JobStatus, JobStore, JobStoreError};

use crate::adapter::{AdapterContext, AdapterRegistry};
use crate::bulk::BulkRunner;
use crate::cancel::CancelRegistry;
use crate::provider::BulkItem;

/// One unit of work handed from the launcher to the dispatch worker.
#[derive(Debug)]
pub struct DispatchRequest {
    pub job: Job,
}

pub(crate) struct DispatchWorker {
    store: Arc<dyn JobStore>,
    registry: Arc<AdapterRegistry>,
    bulk_runner: BulkRunner,
    cancellations: Arc<CancelRegistry>,
}

impl DispatchWorker {
    pub(crate) fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<AdapterRegistry>,
        bulk_runner: BulkRunner,
        cancellations: Arc<CancelRegistry>,
    ) -> Self {
        Self {
            store,
            registry,
            bulk_runner,
            cancellations,
        }
    }

    /// Drain the queue until every sender is dropped.
    pub(crate) fn spawn(self, mut queue: mpsc::Receiver<DispatchRequest>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = queue.recv().await {
                self.dispatch(request.job).await;
            }
            debug!("dispatch queue closed, worker exits");
        })
    }

    async fn dispatch(&self, job: Job) {
        let job_id = job.id;
        debug!(job_id = %job_id, action = job.kind.action(), "dispatching job");

        match &job.kind {
            shopops_jobs::JobKind::Import { source } => {
                let source = *source;
                let adapter = match self.registry.resolve(source) {
                    Ok(adapter) => adapter,
                    Err(e) => {
                        warn!(job_id = %job_id, source = %source, "no adapter registered");
                        self.mark_failed(job_id, ErrorLogEntry::new("dispatch", e.to_string()));
                        return;
                    }
                };

                // The adapter owns progress from here; mark the handoff so
                // observers stop seeing Pending.
                if let Err(e) = self.store.update(
                    job_id,
                    JobPatch::new()
                        .with_status(JobStatus::Processing)
                        .with_started_at(Utc::now()),
                ) {
                    error!(job_id = %job_id, error = %e, "could not mark handoff");
                    return;
                }

                let ctx = AdapterContext {
                    job_id,
                    tenant_id: job.tenant_id,
                    source,
                    config: job.config.clone(),
                };
                if let Err(e) = adapter.run(ctx).await {
                    warn!(job_id = %job_id, error = %e, "import adapter failed");
                    self.mark_failed(job_id, ErrorLogEntry::new("dispatch", e.to_string()));
                } else {
                    info!(job_id = %job_id, "import adapter finished");
                }
            }
            shopops_jobs::JobKind::BulkContent => {
                let items = match BulkItem::parse_items(&job.config) {
                    Ok(items) => items,
                    Err(msg) => {
                        warn!(job_id = %job_id, "bulk config rejected: {msg}");
                        self.mark_failed(job_id, ErrorLogEntry::new("batch", msg));
                        return;
                    }
                };

                let token = self.cancellations.register(job_id);
                if let Err(e) = self.bulk_runner.run(&job, items, token).await {
                    error!(job_id = %job_id, error = %e, "bulk run aborted");
                }
                self.cancellations.remove(job_id);
            }
            shopops_jobs::JobKind::Custom { kind } => {
                warn!(job_id = %job_id, kind, "no handler for custom job kind");
                self.mark_failed(
                    job_id,
                    ErrorLogEntry::new("dispatch", format!("no handler for job kind {kind:?}")),
                );
            }
        }
    }

    /// Terminal failure write, tolerating a cancel that got there first.
    fn mark_failed(&self, job_id: shopops_jobs::JobId, entry: ErrorLogEntry) {
        let patch = JobPatch::new()
            .with_status(JobStatus::Failed)
            .with_completed_at(Utc::now())
            .with_error(entry);
        match self.store.update(job_id, patch) {
            Ok(_) | Err(JobStoreError::TerminalStatus(_)) => {}
            Err(e) => error!(job_id = %job_id, error = %e, "failed to record dispatch failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    use shopops_core::TenantId;
    use shopops_jobs::{InMemoryJobStore, JobKind, SourceKind};

    use crate::adapter::{AdapterError, SourceAdapter};
    use crate::provider::{ContentProvider, GeneratedContent, ProviderError};

    struct RecordingAdapter {
        store: Arc<InMemoryJobStore>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl SourceAdapter for RecordingAdapter {
        async fn run(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
            if self.fail {
                return Err(AdapterError::Failed("feed unreachable".into()));
            }
            self.store
                .update(
                    ctx.job_id,
                    JobPatch::new()
                        .with_status(JobStatus::Completed)
                        .with_total_items(3)
                        .with_counters(3, 3, 0)
                        .with_completed_at(Utc::now()),
                )
                .map_err(|e| AdapterError::Failed(e.to_string()))?;
            Ok(())
        }
    }

    struct OkProvider;

    #[async_trait::async_trait]
    impl ContentProvider for OkProvider {
        async fn generate(
            &self,
            _tenant_id: TenantId,
            _item: &BulkItem,
        ) -> Result<GeneratedContent, ProviderError> {
            Ok(GeneratedContent::new(json!({"ok": true})))
        }
    }

    fn worker(store: Arc<InMemoryJobStore>, registry: AdapterRegistry) -> DispatchWorker {
        let runner = BulkRunner::new(store.clone(), Arc::new(OkProvider), Duration::ZERO);
        DispatchWorker::new(
            store,
            Arc::new(registry),
            runner,
            Arc::new(CancelRegistry::new()),
        )
    }

    fn seed(store: &InMemoryJobStore, kind: JobKind, config: serde_json::Value) -> Job {
        let job = Job::new(TenantId::new(), kind, config);
        store.create(job.clone()).unwrap();
        job
    }

    #[tokio::test]
    async fn import_routes_to_the_registered_adapter() {
        let store = InMemoryJobStore::arc();
        let registry = AdapterRegistry::new().register(
            SourceKind::Csv,
            Arc::new(RecordingAdapter {
                store: store.clone(),
                fail: false,
            }),
        );
        let worker = worker(store.clone(), registry);
        let job = seed(
            &store,
            JobKind::import(SourceKind::Csv),
            json!({"source_url": "https://feeds.example.com/products.csv"}),
        );

        worker.dispatch(job.clone()).await;

        let current = store.get(job.tenant_id, job.id).unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Completed);
        assert_eq!(current.success_items, 3);
    }

    #[tokio::test]
    async fn unsupported_source_kind_fails_the_job() {
        let store = InMemoryJobStore::arc();
        let worker = worker(store.clone(), AdapterRegistry::new());
        let job = seed(
            &store,
            JobKind::import(SourceKind::Ftp),
            json!({"source_url": "ftp://feeds.example.com/products"}),
        );

        worker.dispatch(job.clone()).await;

        let current = store.get(job.tenant_id, job.id).unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Failed);
        let entry = current.first_error().unwrap();
        assert_eq!(entry.item_ref, "dispatch");
        assert!(entry.message.contains("ftp"));
    }

    #[tokio::test]
    async fn adapter_failure_is_recorded_on_the_job() {
        let store = InMemoryJobStore::arc();
        let registry = AdapterRegistry::new().register(
            SourceKind::Url,
            Arc::new(RecordingAdapter {
                store: store.clone(),
                fail: true,
            }),
        );
        let worker = worker(store.clone(), registry);
        let job = seed(
            &store,
            JobKind::import(SourceKind::Url),
            json!({"source_url": "https://feeds.example.com/products"}),
        );

        worker.dispatch(job.clone()).await;

        let current = store.get(job.tenant_id, job.id).unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Failed);
        assert!(current.first_error().unwrap().message.contains("feed unreachable"));
    }

    #[tokio::test]
    async fn bulk_jobs_run_through_the_runner() {
        let store = InMemoryJobStore::arc();
        let worker = worker(store.clone(), AdapterRegistry::new());
        let job = seed(
            &store,
            JobKind::bulk_content(),
            json!({"items": ["sku-1", "sku-2"]}),
        );

        worker.dispatch(job.clone()).await;

        let current = store.get(job.tenant_id, job.id).unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Completed);
        assert_eq!(current.success_items, 2);
    }

    #[tokio::test]
    async fn malformed_bulk_config_fails_before_any_item() {
        let store = InMemoryJobStore::arc();
        let worker = worker(store.clone(), AdapterRegistry::new());
        let job = seed(&store, JobKind::bulk_content(), json!({"items": 7}));

        worker.dispatch(job.clone()).await;

        let current = store.get(job.tenant_id, job.id).unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Failed);
        assert_eq!(current.processed_items, 0);
        assert_eq!(current.first_error().unwrap().item_ref, "batch");
    }

    #[tokio::test]
    async fn custom_kinds_without_a_handler_fail() {
        let store = InMemoryJobStore::arc();
        let worker = worker(store.clone(), AdapterRegistry::new());
        let job = seed(&store, JobKind::custom("reindex"), json!({}));

        worker.dispatch(job.clone()).await;

        let current = store.get(job.tenant_id, job.id).unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Failed);
        assert!(current.first_error().unwrap().message.contains("reindex"));
    }

    #[tokio::test]
    async fn worker_drains_the_queue_until_close() {
        let store = InMemoryJobStore::arc();
        let worker = worker(store.clone(), AdapterRegistry::new());
        let (tx, rx) = mpsc::channel(4);
        let handle = worker.spawn(rx);

        let job = seed(
            &store,
            JobKind::bulk_content(),
            json!({"items": ["sku-1"]}),
        );
        tx.send(DispatchRequest { job: job.clone() }).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let current = store.get(job.tenant_id, job.id).unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Completed);
    }
}
