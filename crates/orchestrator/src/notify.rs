//! Caller notification channel (discrete events, pub/sub).
//!
//! Best-effort fan-out over lightweight channels: notifications are UI
//! signals, not durable facts — the job record is the source of truth.
//! Subscribers that went away are pruned on publish.

use std::sync::{Mutex, mpsc};
use std::time::Duration;

use shopops_core::TenantId;
use shopops_jobs::JobId;
use shopops_ratelimit::RateLimitDecision;

/// A discrete event for the caller (UI) with the relevant counters attached.
#[derive(Debug, Clone)]
pub enum Notification {
    JobStarted {
        job_id: JobId,
        tenant_id: TenantId,
        action: String,
    },
    JobCompleted {
        job_id: JobId,
        tenant_id: TenantId,
        success_items: u32,
        total_items: u32,
    },
    JobFailed {
        job_id: JobId,
        tenant_id: TenantId,
        error: String,
    },
    RateLimitRejected {
        tenant_id: TenantId,
        action: String,
        decision: RateLimitDecision,
    },
    /// The monitor stopped observing; the job itself was not touched.
    MonitorTimeout {
        job_id: JobId,
        tenant_id: TenantId,
        polls: u32,
    },
}

impl Notification {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Notification::JobStarted { job_id, .. }
            | Notification::JobCompleted { job_id, .. }
            | Notification::JobFailed { job_id, .. }
            | Notification::MonitorTimeout { job_id, .. } => Some(*job_id),
            Notification::RateLimitRejected { .. } => None,
        }
    }

    /// Short human-readable message; exact rendering is up to the consumer.
    pub fn message(&self) -> String {
        match self {
            Notification::JobStarted { action, .. } => {
                format!("{action} job started")
            }
            Notification::JobCompleted {
                success_items,
                total_items,
                ..
            } => format!("job completed: {success_items}/{total_items} items succeeded"),
            Notification::JobFailed { error, .. } => format!("job failed: {error}"),
            Notification::RateLimitRejected { decision, .. } => format!(
                "rate limit reached ({}/{}), retry in {}",
                decision.current_count,
                decision.max_requests,
                decision.reset_countdown()
            ),
            Notification::MonitorTimeout { polls, .. } => {
                format!("stopped watching job after {polls} polls; it may still be running")
            }
        }
    }
}

/// A subscription to the notification stream.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<Notification>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<Notification>) -> Self {
        Self { receiver }
    }

    /// Block until the next notification is available.
    pub fn recv(&self) -> Result<Notification, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a notification without blocking.
    pub fn try_recv(&self) -> Result<Notification, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a notification.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Notification, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Notification pub/sub abstraction (transport-agnostic).
pub trait NotificationBus: Send + Sync {
    /// Best-effort broadcast to all live subscribers.
    fn publish(&self, notification: Notification);

    fn subscribe(&self) -> Subscription;
}

impl<B: NotificationBus + ?Sized> NotificationBus for std::sync::Arc<B> {
    fn publish(&self, notification: Notification) {
        (**self).publish(notification)
    }

    fn subscribe(&self) -> Subscription {
        (**self).subscribe()
    }
}

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Best-effort fan-out
/// - Dead subscribers are dropped on publish
#[derive(Debug, Default)]
pub struct InMemoryNotificationBus {
    subscribers: Mutex<Vec<mpsc::Sender<Notification>>>,
}

impl InMemoryNotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new())
    }
}

impl NotificationBus for InMemoryNotificationBus {
    fn publish(&self, notification: Notification) {
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            // A poisoned bus only loses UI signals, never job state.
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_notification() -> Notification {
        Notification::JobCompleted {
            job_id: JobId::new(),
            tenant_id: TenantId::new(),
            success_items: 4,
            total_items: 5,
        }
    }

    #[test]
    fn fan_out_to_all_subscribers() {
        let bus = InMemoryNotificationBus::new();
        let sub1 = bus.subscribe();
        let sub2 = bus.subscribe();

        bus.publish(test_notification());

        assert!(sub1.try_recv().is_ok());
        assert!(sub2.try_recv().is_ok());
    }

    #[test]
    fn dead_subscribers_are_pruned() {
        let bus = InMemoryNotificationBus::new();
        drop(bus.subscribe());
        let live = bus.subscribe();

        bus.publish(test_notification());
        bus.publish(test_notification());

        assert!(live.try_recv().is_ok());
        assert!(live.try_recv().is_ok());
    }

    #[test]
    fn messages_carry_counters() {
        let n = test_notification();
        assert_eq!(n.message(), "job completed: 4/5 items succeeded");
        assert!(n.job_id().is_some());

        let timeout = Notification::MonitorTimeout {
            job_id: JobId::new(),
            tenant_id: TenantId::new(),
            polls: 120,
        };
        assert!(timeout.message().contains("120 polls"));
    }
}
