//! Tracked units of asynchronous back-office work.
//!
//! ## Design
//!
//! - Jobs are tenant-scoped and typed (catalog imports, bulk content runs)
//! - Status transitions are monotonic; a terminal status is never revised
//! - Progress counters and the error log are updated incrementally so
//!   observers see live progress, not an all-or-nothing result
//! - Partial updates merge field-wise (`JobPatch`), never overwrite
//!
//! ## Components
//!
//! - `Job`: the job record with lifecycle, counters and error log
//! - `JobPatch`: partial update applied as a merge
//! - `JobStore`: persistence seam (in-memory or durable)

pub mod store;
pub mod types;

pub use store::{InMemoryJobStore, JobFilter, JobStore, JobStoreError};
pub use types::{
    BatchItemResult, ErrorLogEntry, Job, JobId, JobKind, JobPatch, JobStatus, SourceKind,
};
