//! Window policies and admission decisions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-window policy for one action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Policy of `max_requests` per `minutes`-minute window.
    pub fn per_minutes(max_requests: u32, minutes: u64) -> Self {
        Self::new(max_requests, Duration::from_secs(minutes * 60))
    }

    pub fn window_minutes(&self) -> u64 {
        self.window.as_secs() / 60
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Count inside the current window, including this request when allowed
    pub current_count: u32,
    pub max_requests: u32,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// An allowing decision used when enforcement degrades (fail-open).
    pub fn fail_open(policy: &RateLimitPolicy) -> Self {
        Self {
            allowed: true,
            current_count: 0,
            max_requests: policy.max_requests,
            reset_at: Utc::now()
                + chrono::Duration::from_std(policy.window).unwrap_or_default(),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.max_requests.saturating_sub(self.current_count)
    }

    /// Human-readable countdown until the window resets ("14m05s").
    pub fn reset_countdown(&self) -> String {
        let secs = (self.reset_at - Utc::now()).num_seconds().max(0);
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}
