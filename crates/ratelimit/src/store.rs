//! Rate-limit counter storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use shopops_core::TenantId;

use crate::window::{RateLimitDecision, RateLimitPolicy};

/// Atomic check-and-increment counter seam.
///
/// `check_and_increment` must be atomic against concurrent callers for the
/// same `(tenant, action)` key; an expired window resets together with the
/// increment that triggered the check, as a single indivisible operation.
pub trait RateLimitStore: Send + Sync {
    fn check_and_increment(
        &self,
        tenant_id: TenantId,
        action: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision, RateLimitStoreError>;

    /// Non-mutating read of the same window.
    ///
    /// Must not be implemented by calling `check_and_increment` with an
    /// inflated limit; that still mutates the counter.
    fn peek(
        &self,
        tenant_id: TenantId,
        action: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision, RateLimitStoreError>;
}

impl<S: RateLimitStore + ?Sized> RateLimitStore for Arc<S> {
    fn check_and_increment(
        &self,
        tenant_id: TenantId,
        action: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        (**self).check_and_increment(tenant_id, action, policy)
    }

    fn peek(
        &self,
        tenant_id: TenantId,
        action: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        (**self).peek(tenant_id, action, policy)
    }
}

/// Rate-limit store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitStoreError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    window_start: DateTime<Utc>,
}

/// In-memory fixed-window store for tests/dev.
///
/// A single mutex over the window map makes reset+increment indivisible.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<(TenantId, String), WindowState>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    #[cfg(test)]
    fn rewind_window(&self, tenant_id: TenantId, action: &str, by: chrono::Duration) {
        let mut windows = self.windows.lock().unwrap();
        if let Some(state) = windows.get_mut(&(tenant_id, action.to_string())) {
            state.window_start -= by;
        }
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn check_and_increment(
        &self,
        tenant_id: TenantId,
        action: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        let window = chrono::Duration::from_std(policy.window).unwrap_or_default();
        let now = Utc::now();

        let mut windows = self.windows.lock().unwrap();
        let state = windows
            .entry((tenant_id, action.to_string()))
            .or_insert(WindowState {
                count: 0,
                window_start: now,
            });

        if now - state.window_start >= window {
            // Expired: reset and count this request in one step.
            state.count = 0;
            state.window_start = now;
        }

        let allowed = state.count < policy.max_requests;
        if allowed {
            state.count += 1;
        }

        Ok(RateLimitDecision {
            allowed,
            current_count: state.count,
            max_requests: policy.max_requests,
            reset_at: state.window_start + window,
        })
    }

    fn peek(
        &self,
        tenant_id: TenantId,
        action: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        let window = chrono::Duration::from_std(policy.window).unwrap_or_default();
        let now = Utc::now();

        let windows = self.windows.lock().unwrap();
        let decision = match windows.get(&(tenant_id, action.to_string())) {
            Some(state) if now - state.window_start < window => RateLimitDecision {
                allowed: state.count < policy.max_requests,
                current_count: state.count,
                max_requests: policy.max_requests,
                reset_at: state.window_start + window,
            },
            // No live window: a fresh one would start now.
            _ => RateLimitDecision {
                allowed: policy.max_requests > 0,
                current_count: 0,
                max_requests: policy.max_requests,
                reset_at: now + window,
            },
        };

        Ok(decision)
    }
}
