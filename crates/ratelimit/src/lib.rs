//! Fixed-window admission control.
//!
//! ## Design
//!
//! - Windows are keyed `(tenant, action)`; different tenants never share a
//!   counter
//! - Reset-on-expiry and increment are one indivisible operation: two racing
//!   callers that would each individually pass must not both slip past the
//!   limit
//! - `peek` is a dedicated read-only query; it never mutates a counter
//! - Enforcement **fails open**: if the backing store is unreachable the
//!   request is allowed and the degradation is logged, trading strictness
//!   for availability
//!
//! ## Components
//!
//! - `RateLimitPolicy` / `RateLimitDecision`: window shape and verdict
//! - `RateLimitStore`: atomic counter seam (in-memory or durable)
//! - `RateLimiter`: per-action policy table + fail-open facade

pub mod limiter;
pub mod store;
pub mod window;

pub use limiter::RateLimiter;
pub use store::{InMemoryRateLimitStore, RateLimitStore, RateLimitStoreError};
pub use window::{RateLimitDecision, RateLimitPolicy};
