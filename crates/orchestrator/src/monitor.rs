//! Per-job polling of the job store until a terminal state or budget.
//!
//! Polling is the deliberate design: there is no push channel from the
//! adapters. Each watched job gets its own timer task; the registry is an
//! instance field, never module-global state, so multiple monitors can
//! coexist and tests stay deterministic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use shopops_core::TenantId;
use shopops_jobs::{Job, JobId, JobStatus, JobStore};

use crate::config::OrchestratorConfig;
use crate::notify::{Notification, NotificationBus};

/// Client-side observer of long-running jobs.
///
/// A watch ends in one of three silent ways (record missing, store
/// unreachable, explicit `stop`) or one loud way: exactly one terminal or
/// timeout notification. Exhausting the poll budget never alters the
/// persisted job; work may still be running server-side after the monitor
/// stops observing it.
pub struct StatusMonitor {
    store: Arc<dyn JobStore>,
    bus: Arc<dyn NotificationBus>,
    config: OrchestratorConfig,
    watches: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl StatusMonitor {
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: Arc<dyn NotificationBus>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            config,
            watches: Mutex::new(HashMap::new()),
        })
    }

    /// Begin watching a job. Idempotent: a second `start` for a job already
    /// being watched is a no-op.
    pub fn start(self: &Arc<Self>, tenant_id: TenantId, job_id: JobId) {
        let mut watches = self.watches.lock().unwrap();
        if let Some(handle) = watches.get(&job_id) {
            if !handle.is_finished() {
                debug!(job_id = %job_id, "already watching, start is a no-op");
                return;
            }
        }

        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            monitor.watch(tenant_id, job_id).await;
            monitor.watches.lock().unwrap().remove(&job_id);
        });
        watches.insert(job_id, handle);
        debug!(job_id = %job_id, "watch started");
    }

    /// Stop watching. Safe to call repeatedly or for unknown jobs.
    pub fn stop(&self, job_id: JobId) {
        if let Some(handle) = self.watches.lock().unwrap().remove(&job_id) {
            handle.abort();
            debug!(job_id = %job_id, "watch stopped");
        }
    }

    pub fn is_watching(&self, job_id: JobId) -> bool {
        self.watches
            .lock()
            .unwrap()
            .get(&job_id)
            .is_some_and(|h| !h.is_finished())
    }

    async fn watch(&self, tenant_id: TenantId, job_id: JobId) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for _ in 0..self.config.max_polls {
            ticker.tick().await;

            let job = match self.store.get(tenant_id, job_id) {
                Ok(Some(job)) => job,
                Ok(None) => {
                    // Record gone (retention, external delete): clean up silently.
                    debug!(job_id = %job_id, "job record missing, watch ends");
                    return;
                }
                Err(e) => {
                    // Infra degradation: stop polling, no crash, no notification.
                    debug!(job_id = %job_id, error = %e, "store unreachable, watch ends");
                    return;
                }
            };

            if job.is_terminal() {
                self.emit_terminal(&job);
                return;
            }
        }

        warn!(
            job_id = %job_id,
            polls = self.config.max_polls,
            "poll budget exhausted, job may still be running server-side"
        );
        self.bus.publish(Notification::MonitorTimeout {
            job_id,
            tenant_id,
            polls: self.config.max_polls,
        });
    }

    fn emit_terminal(&self, job: &Job) {
        info!(job_id = %job.id, status = %job.status, "job reached terminal status");
        let notification = match job.status {
            JobStatus::Completed => Notification::JobCompleted {
                job_id: job.id,
                tenant_id: job.tenant_id,
                success_items: job.success_items,
                total_items: job.total_items,
            },
            _ => Notification::JobFailed {
                job_id: job.id,
                tenant_id: job.tenant_id,
                error: job
                    .first_error()
                    .map(|e| format!("{}: {}", e.item_ref, e.message))
                    .unwrap_or_else(|| format!("job {}", job.status)),
            },
        };
        self.bus.publish(notification);
    }
}
