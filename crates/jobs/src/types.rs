//! Core job types: lifecycle, progress counters, error log.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shopops_core::{DomainError, TenantId};

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a catalog import reads its data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Url,
    Csv,
    Xml,
    Json,
    Api,
    Ftp,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::Url,
        SourceKind::Csv,
        SourceKind::Xml,
        SourceKind::Json,
        SourceKind::Api,
        SourceKind::Ftp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Url => "url",
            SourceKind::Csv => "csv",
            SourceKind::Xml => "xml",
            SourceKind::Json => "json",
            SourceKind::Api => "api",
            SourceKind::Ftp => "ftp",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown source kind: {s}")))
    }
}

/// Job kind for routing to the appropriate handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Catalog import executed by a source-specific adapter
    Import { source: SourceKind },
    /// In-process bulk AI content generation, one sub-operation per item
    BulkContent,
    /// Generic/custom job
    Custom { kind: String },
}

impl JobKind {
    pub fn import(source: SourceKind) -> Self {
        Self::Import { source }
    }

    pub fn bulk_content() -> Self {
        Self::BulkContent
    }

    pub fn custom(kind: impl Into<String>) -> Self {
        Self::Custom { kind: kind.into() }
    }

    /// The source kind for adapter-driven jobs; `None` for in-process kinds.
    pub fn source_kind(&self) -> Option<SourceKind> {
        match self {
            JobKind::Import { source } => Some(*source),
            _ => None,
        }
    }

    /// Short label for logging and rate-limit action keys.
    pub fn action(&self) -> &str {
        match self {
            JobKind::Import { .. } => "import.product",
            JobKind::BulkContent => "content.bulk_generate",
            JobKind::Custom { kind } => kind,
        }
    }
}

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for dispatch
    Pending,
    /// Work is underway (adapter or bulk loop owns progress)
    Processing,
    /// Ran to the end with results recorded; does **not** imply zero failures
    Completed,
    /// Aborted: dispatch failure, outer batch error, operator cancel, or stall
    Failed,
    /// Cancelled by an external adapter before any abort path ran
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal, monotonic transition.
    ///
    /// Re-asserting the current status is always allowed (idempotent patches).
    pub fn can_transition(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            JobStatus::Pending => matches!(next, JobStatus::Processing | JobStatus::Failed),
            JobStatus::Processing => next.is_terminal(),
            // Terminal statuses are never revised.
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One entry of a job's ordered error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    /// Which sub-item failed ("item:3", "dispatch", "batch", ...)
    pub item_ref: String,
    pub message: String,
}

impl ErrorLogEntry {
    pub fn new(item_ref: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item_ref: item_ref.into(),
            message: message.into(),
        }
    }
}

/// Outcome of one sub-operation inside a bulk run.
///
/// Ephemeral: folded into the job's counters and error log as it is
/// produced, never persisted standalone.
#[derive(Debug, Clone)]
pub struct BatchItemResult {
    pub item_ref: String,
    pub outcome: Result<serde_json::Value, String>,
}

impl BatchItemResult {
    pub fn success(item_ref: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            item_ref: item_ref.into(),
            outcome: Ok(payload),
        }
    }

    pub fn failure(item_ref: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item_ref: item_ref.into(),
            outcome: Err(message.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A tracked unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Job kind for routing
    pub kind: JobKind,
    /// Current status
    pub status: JobStatus,
    /// Expected number of sub-items (0 when the adapter owns counting)
    pub total_items: u32,
    /// Items attempted so far
    pub processed_items: u32,
    /// Items that succeeded
    pub success_items: u32,
    /// Items that failed (isolated, did not abort the job)
    pub failed_items: u32,
    /// Ordered per-item failure log
    pub error_log: Vec<ErrorLogEntry>,
    /// Cooperative-cancellation flag, observed by the bulk loop
    pub cancel_requested: bool,
    /// Opaque kind-specific settings blob
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(tenant_id: TenantId, kind: JobKind, config: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            tenant_id,
            kind,
            status: JobStatus::Pending,
            total_items: 0,
            processed_items: 0,
            success_items: 0,
            failed_items: 0,
            error_log: Vec::new(),
            cancel_requested: false,
            config,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn with_total_items(mut self, total: u32) -> Self {
        self.total_items = total;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// First entry of the error log, used for the failure notification.
    pub fn first_error(&self) -> Option<&ErrorLogEntry> {
        self.error_log.first()
    }

    /// Check the counter invariants that must hold at every observed point.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.total_items > 0 && self.processed_items > self.total_items {
            return Err(DomainError::invariant(format!(
                "processed_items {} exceeds total_items {}",
                self.processed_items, self.total_items
            )));
        }
        if self.processed_items > 0
            && self.success_items + self.failed_items != self.processed_items
        {
            return Err(DomainError::invariant(format!(
                "success {} + failed {} != processed {}",
                self.success_items, self.failed_items, self.processed_items
            )));
        }
        Ok(())
    }
}

/// Partial update applied by `JobStore::update` as a field-wise merge.
///
/// `append_errors` appends to the job's error log; nothing ever truncates it.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub total_items: Option<u32>,
    pub processed_items: Option<u32>,
    pub success_items: Option<u32>,
    pub failed_items: Option<u32>,
    pub append_errors: Vec<ErrorLogEntry>,
    pub cancel_requested: Option<bool>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_total_items(mut self, total: u32) -> Self {
        self.total_items = Some(total);
        self
    }

    pub fn with_counters(mut self, processed: u32, success: u32, failed: u32) -> Self {
        self.processed_items = Some(processed);
        self.success_items = Some(success);
        self.failed_items = Some(failed);
        self
    }

    pub fn with_error(mut self, entry: ErrorLogEntry) -> Self {
        self.append_errors.push(entry);
        self
    }

    pub fn with_cancel_requested(mut self, flag: bool) -> Self {
        self.cancel_requested = Some(flag);
        self
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// Merge this patch into `job`. Status legality is checked by the store
    /// before calling this.
    pub(crate) fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(total) = self.total_items {
            job.total_items = total;
        }
        if let Some(processed) = self.processed_items {
            job.processed_items = processed;
        }
        if let Some(success) = self.success_items {
            job.success_items = success;
        }
        if let Some(failed) = self.failed_items {
            job.failed_items = failed;
        }
        job.error_log.extend(self.append_errors.iter().cloned());
        if let Some(flag) = self.cancel_requested {
            job.cancel_requested = flag;
        }
        if let Some(at) = self.started_at {
            job.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            job.completed_at = Some(at);
        }
        job.updated_at = Utc::now();
    }
}
