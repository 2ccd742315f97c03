//! Per-message acknowledgment tracking.
//!
//! Every sent message registers a pending entry that resolves exactly once:
//! to delivered when the matching `ACK` arrives, or to uncertain when the
//! ack timeout passes first. There is no automatic retry; a timed-out send
//! is reported as delivery-uncertain, not raised as an error.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Outcome of one tracked send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The recipient acknowledged the message.
    Delivered,
    /// No acknowledgment arrived within the timeout. The message may or
    /// may not have been received.
    Uncertain,
}

/// A message awaiting acknowledgment.
pub struct PendingAck {
    /// The tracked message.
    pub message_id: Uuid,
    /// Epoch milliseconds when the send was registered.
    pub sent_at: i64,
    /// Epoch milliseconds after which the send becomes uncertain.
    pub timeout_at: i64,
    notify: oneshot::Sender<DeliveryStatus>,
}

impl fmt::Debug for PendingAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAck")
            .field("message_id", &self.message_id)
            .field("sent_at", &self.sent_at)
            .field("timeout_at", &self.timeout_at)
            .finish()
    }
}

/// Caller-side handle for one tracked send.
#[derive(Debug)]
pub struct PendingDelivery {
    message_id: Uuid,
    receiver: oneshot::Receiver<DeliveryStatus>,
}

impl PendingDelivery {
    /// The message this handle tracks.
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Wait for the delivery outcome.
    ///
    /// Resolves to uncertain if the tracker goes away before an ack or
    /// timeout, for example on shutdown.
    pub async fn wait(self) -> DeliveryStatus {
        self.receiver.await.unwrap_or(DeliveryStatus::Uncertain)
    }
}

/// Tracks pending acknowledgments for one connection.
pub struct DeliveryTracker {
    timeout: Duration,
    pending: Mutex<HashMap<Uuid, PendingAck>>,
}

impl DeliveryTracker {
    /// Create a tracker whose entries expire after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a sent message and get the handle that resolves on ack or
    /// timeout.
    pub async fn track(&self, message_id: Uuid) -> PendingDelivery {
        let sent_at = Utc::now().timestamp_millis();
        let (notify, receiver) = oneshot::channel();
        let entry = PendingAck {
            message_id,
            sent_at,
            timeout_at: sent_at + self.timeout.as_millis() as i64,
            notify,
        };

        self.pending.lock().await.insert(message_id, entry);

        PendingDelivery {
            message_id,
            receiver,
        }
    }

    /// Resolve a pending entry as delivered.
    ///
    /// Returns whether a matching entry existed; acks for unknown or
    /// already-resolved messages are ignored.
    pub async fn acknowledge(&self, message_id: Uuid) -> bool {
        let entry = self.pending.lock().await.remove(&message_id);
        match entry {
            Some(entry) => {
                let _ = entry.notify.send(DeliveryStatus::Delivered);
                true
            }
            None => {
                debug!(%message_id, "ack for unknown message ignored");
                false
            }
        }
    }

    /// Drop a pending entry without resolving it. Used when the transmit
    /// itself failed and the caller is getting an error instead of a
    /// delivery outcome.
    pub async fn cancel(&self, message_id: Uuid) -> bool {
        self.pending.lock().await.remove(&message_id).is_some()
    }

    /// Expire entries whose deadline passed, resolving them as uncertain.
    /// Returns the expired message ids.
    pub async fn sweep(&self, now_ms: i64) -> Vec<Uuid> {
        let mut pending = self.pending.lock().await;
        let expired: Vec<Uuid> = pending
            .values()
            .filter(|entry| entry.timeout_at <= now_ms)
            .map(|entry| entry.message_id)
            .collect();

        for message_id in &expired {
            if let Some(entry) = pending.remove(message_id) {
                let _ = entry.notify.send(DeliveryStatus::Uncertain);
            }
        }
        expired
    }

    /// Whether `message_id` is still awaiting an ack.
    pub async fn contains(&self, message_id: Uuid) -> bool {
        self.pending.lock().await.contains_key(&message_id)
    }

    /// Number of messages awaiting acknowledgment.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// The configured ack timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_before_timeout_reports_delivered() {
        let tracker = DeliveryTracker::new(Duration::from_secs(30));
        let message_id = Uuid::new_v4();

        let handle = tracker.track(message_id).await;
        assert!(tracker.contains(message_id).await);

        assert!(tracker.acknowledge(message_id).await);
        assert!(!tracker.contains(message_id).await);
        assert_eq!(handle.wait().await, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn duplicate_or_unknown_acks_are_ignored() {
        let tracker = DeliveryTracker::new(Duration::from_secs(30));
        let message_id = Uuid::new_v4();

        let _handle = tracker.track(message_id).await;
        assert!(tracker.acknowledge(message_id).await);
        assert!(!tracker.acknowledge(message_id).await);
        assert!(!tracker.acknowledge(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn timeout_reports_uncertain_not_an_error() {
        let tracker = DeliveryTracker::new(Duration::from_secs(30));
        let message_id = Uuid::new_v4();
        let handle = tracker.track(message_id).await;

        let expired = tracker.sweep(i64::MAX).await;
        assert_eq!(expired, vec![message_id]);
        assert!(!tracker.contains(message_id).await);
        assert_eq!(handle.wait().await, DeliveryStatus::Uncertain);
    }

    #[tokio::test]
    async fn sweep_leaves_unexpired_entries_alone() {
        let tracker = DeliveryTracker::new(Duration::from_secs(30));
        let message_id = Uuid::new_v4();
        let _handle = tracker.track(message_id).await;

        assert!(tracker.sweep(0).await.is_empty());
        assert!(tracker.contains(message_id).await);
        assert_eq!(tracker.pending_count().await, 1);
    }

    #[tokio::test]
    async fn cancelled_entries_are_gone_without_a_delivered_outcome() {
        let tracker = DeliveryTracker::new(Duration::from_secs(30));
        let message_id = Uuid::new_v4();
        let handle = tracker.track(message_id).await;

        assert!(tracker.cancel(message_id).await);
        assert!(!tracker.contains(message_id).await);
        assert!(!tracker.cancel(message_id).await);
        assert_eq!(handle.wait().await, DeliveryStatus::Uncertain);
    }

    #[tokio::test]
    async fn dropping_the_tracker_resolves_waiters_as_uncertain() {
        let tracker = DeliveryTracker::new(Duration::from_secs(30));
        let handle = tracker.track(Uuid::new_v4()).await;

        drop(tracker);
        assert_eq!(handle.wait().await, DeliveryStatus::Uncertain);
    }

    #[tokio::test]
    async fn deadlines_derive_from_the_configured_timeout() {
        let tracker = DeliveryTracker::new(Duration::from_secs(7));
        let message_id = Uuid::new_v4();
        let _handle = tracker.track(message_id).await;

        let pending = tracker.pending.lock().await;
        let entry = pending.get(&message_id).expect("tracked");
        assert_eq!(entry.timeout_at - entry.sent_at, 7_000);
    }
}
