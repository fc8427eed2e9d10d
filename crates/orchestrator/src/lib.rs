//! Asynchronous job orchestration: launcher, dispatch, monitoring, bulk runs.
//!
//! ## Design
//!
//! - Admission control runs **before** any job row exists (fail-open limiter)
//! - Dispatch is decoupled: `start_job` enqueues onto a bounded queue consumed
//!   by a background worker and returns immediately; dispatch failures surface
//!   only via later job status
//! - Long-running remote work is observed by polling, not push: one monitor
//!   task per job, bounded by a poll budget
//! - Bulk runs execute sub-items strictly sequentially with per-item failure
//!   isolation and incremental progress persistence
//! - Cancellation is cooperative: a token checked at the top of every
//!   iteration, bridged to the persisted flag by the same store poll already
//!   used for progress
//!
//! ## Components
//!
//! - `Orchestrator`: validates, admits, creates, enqueues (`start_job`),
//!   plus `cancel_job` / `retry_job`
//! - `AdapterRegistry`: pure source-kind → adapter resolution
//! - `StatusMonitor`: per-job polling with a single terminal notification
//! - `BulkRunner`: the in-process batch loop
//! - `StalenessSweeper`: reconciliation for jobs stuck in `processing`

pub mod adapter;
pub mod bulk;
pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod launcher;
pub mod monitor;
pub mod notify;
pub mod provider;
pub mod sweeper;

pub use adapter::{AdapterContext, AdapterError, AdapterRegistry, DispatchError, SourceAdapter};
pub use bulk::BulkRunner;
pub use cancel::{CancelRegistry, CancelToken};
pub use config::OrchestratorConfig;
pub use launcher::{CancelOutcome, JobRequest, LaunchError, Orchestrator};
pub use monitor::StatusMonitor;
pub use notify::{InMemoryNotificationBus, Notification, NotificationBus, Subscription};
pub use provider::{BulkItem, ContentProvider, GeneratedContent, ProviderError};
pub use sweeper::StalenessSweeper;
