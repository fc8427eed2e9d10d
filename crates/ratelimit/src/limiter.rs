//! Fail-open admission facade with per-action policies.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use shopops_core::TenantId;

use crate::store::{RateLimitStore, RateLimitStoreError};
use crate::window::{RateLimitDecision, RateLimitPolicy};

/// Admission control for job launches.
///
/// Holds one policy per action type plus a default. Enforcement fails open:
/// availability is prioritized over strict enforcement when the counter
/// store is unreachable, a deliberate but risky trade-off.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policies: HashMap<String, RateLimitPolicy>,
    default_policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            store,
            policies: HashMap::new(),
            default_policy: RateLimitPolicy::per_minutes(30, 60),
        }
    }

    /// Limiter with the stock back-office policy table.
    pub fn with_default_policies(store: Arc<dyn RateLimitStore>) -> Self {
        Self::new(store)
            .with_policy("import.product", RateLimitPolicy::per_minutes(50, 60))
            .with_policy("import.bulk", RateLimitPolicy::per_minutes(10, 60))
            .with_policy("content.bulk_generate", RateLimitPolicy::per_minutes(20, 60))
    }

    pub fn with_policy(mut self, action: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.policies.insert(action.into(), policy);
        self
    }

    pub fn with_default_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn policy_for(&self, action: &str) -> RateLimitPolicy {
        self.policies
            .get(action)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Check-and-increment for one request. Fails open on store errors.
    pub fn check(&self, tenant_id: TenantId, action: &str) -> RateLimitDecision {
        let policy = self.policy_for(action);
        match self.store.check_and_increment(tenant_id, action, &policy) {
            Ok(decision) => decision,
            Err(RateLimitStoreError::Unavailable(reason)) => {
                warn!(
                    tenant_id = %tenant_id,
                    action,
                    reason,
                    "rate limit store unreachable, admitting request (fail-open)"
                );
                RateLimitDecision::fail_open(&policy)
            }
        }
    }

    /// Read-only window status for UIs/quota displays. Does not mutate.
    pub fn status(
        &self,
        tenant_id: TenantId,
        action: &str,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        let policy = self.policy_for(action);
        self.store.peek(tenant_id, action, &policy)
    }
}
