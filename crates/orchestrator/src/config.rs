//! Orchestrator tuning knobs.

use std::time::Duration;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How often the status monitor polls a job
    pub poll_interval: Duration,
    /// Poll budget per job before the monitor gives up observing
    pub max_polls: u32,
    /// Fixed delay between bulk sub-operations (static backpressure)
    pub inter_item_delay: Duration,
    /// Bounded depth of the dispatch queue
    pub dispatch_queue_depth: usize,
    /// How long a `processing` job may go without finishing before the
    /// sweeper marks it failed
    pub stale_after: Duration,
    /// How often the staleness sweeper runs
    pub sweep_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_polls: 120,
            inter_item_delay: Duration::from_millis(600),
            dispatch_queue_depth: 64,
            stale_after: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    pub fn with_inter_item_delay(mut self, delay: Duration) -> Self {
        self.inter_item_delay = delay;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}
