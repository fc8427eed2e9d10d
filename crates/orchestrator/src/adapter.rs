//! Source-kind → adapter resolution (the dispatch seam).
//!
//! The registry exists purely to keep the launcher free of a large
//! conditional: adding a new source kind is one `register` call plus a new
//! adapter implementation. Resolution is pure and has no side effects.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use shopops_core::TenantId;
use shopops_jobs::{JobId, SourceKind};

/// What an adapter receives at handoff.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub source: SourceKind,
    /// The job's opaque config, including source-specific fields
    pub config: serde_json::Value,
}

/// Adapter-side failure, recorded on the job when dispatch fails.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("adapter failed: {0}")]
    Failed(String),
}

/// A source-kind-specific handler performing the actual extraction work.
///
/// Adapters are independently deployed collaborators from the orchestrator's
/// point of view: once handed a job they own its progress and status
/// updates. An `Err` return here means the invocation itself failed and the
/// orchestrator records the failure.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn run(&self, ctx: AdapterContext) -> Result<(), AdapterError>;
}

/// Dispatch-time failure (the job exists; it transitions to failed).
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("unsupported source kind: {0}")]
    UnsupportedSourceKind(SourceKind),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Pure mapping from a job's declared source kind to its adapter.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, source: SourceKind, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(source, adapter);
        self
    }

    pub fn resolve(&self, source: SourceKind) -> Result<Arc<dyn SourceAdapter>, DispatchError> {
        self.adapters
            .get(&source)
            .cloned()
            .ok_or(DispatchError::UnsupportedSourceKind(source))
    }

    pub fn supports(&self, source: SourceKind) -> bool {
        self.adapters.contains_key(&source)
    }
}
