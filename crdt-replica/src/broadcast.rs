//! Notification fan-out from the authority to every subscribed replica.
//!
//! Uses a tokio broadcast channel: one encoded frame, N receivers. Each
//! subscriber buffers up to `capacity` notifications; a subscriber that falls
//! further behind loses the oldest ones. Lost notifications are never
//! redelivered, which is the same guarantee a database pub/sub channel gives.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::protocol::{Frame, Notification, ProtocolError};

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub notifications_sent: u64,
    pub notifications_dropped: u64,
    pub active_subscribers: usize,
}

/// Lock-free counters; read via `NotificationHub::stats`.
struct AtomicHubStats {
    notifications_sent: AtomicU64,
    notifications_dropped: AtomicU64,
}

/// Fan-out point for encoded notification frames.
pub struct NotificationHub {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    capacity: usize,
    atomic_stats: Arc<AtomicHubStats>,
}

impl NotificationHub {
    /// `capacity` is the per-subscriber buffer before lagging subscribers drop.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            atomic_stats: Arc::new(AtomicHubStats {
                notifications_sent: AtomicU64::new(0),
                notifications_dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Encode and publish a notification.
    ///
    /// Returns the number of subscribers that will see it (0 is not an error).
    pub fn publish(&self, notification: &Notification) -> Result<usize, ProtocolError> {
        let encoded = Frame::Notification(notification.clone()).encode()?;
        Ok(self.publish_raw(Arc::new(encoded)))
    }

    /// Publish a pre-encoded frame.
    pub fn publish_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.notifications_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// New subscriber; sees only notifications published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }

    /// Record notifications a lagging subscriber lost.
    pub fn record_dropped(&self, count: u64) {
        self.atomic_stats
            .notifications_dropped
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            notifications_sent: self.atomic_stats.notifications_sent.load(Ordering::Relaxed),
            notifications_dropped: self.atomic_stats.notifications_dropped.load(Ordering::Relaxed),
            active_subscribers: self.subscriber_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NotificationKind;
    use tokio::sync::broadcast::error::RecvError;

    fn notification(id: &str) -> Notification {
        Notification {
            kind: NotificationKind::Update,
            object_id: id.to_string(),
            origin: "origin".to_string(),
            payload: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let hub = NotificationHub::new(16);
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        assert_eq!(hub.publish(&notification("c-1")).unwrap(), 2);

        for rx in [&mut rx1, &mut rx2] {
            let bytes = rx.recv().await.unwrap();
            match Frame::decode(&bytes).unwrap() {
                Frame::Notification(n) => assert_eq!(n.object_id, "c-1"),
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = NotificationHub::new(16);
        assert_eq!(hub.publish(&notification("c-1")).unwrap(), 0);
        assert_eq!(hub.stats().notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_notifications() {
        let hub = NotificationHub::new(16);
        hub.publish(&notification("c-1")).unwrap();

        let mut rx = hub.subscribe();
        hub.publish(&notification("c-2")).unwrap();

        let bytes = rx.recv().await.unwrap();
        match Frame::decode(&bytes).unwrap() {
            Frame::Notification(n) => assert_eq!(n.object_id, "c-2"),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lagging_subscriber_loses_oldest() {
        let hub = NotificationHub::new(4);
        let mut rx = hub.subscribe();
        for i in 0..10 {
            hub.publish(&notification(&format!("c-{i}"))).unwrap();
        }

        match rx.recv().await {
            Err(RecvError::Lagged(n)) => {
                hub.record_dropped(n);
                assert_eq!(n, 6);
            }
            other => panic!("expected lag, got {other:?}"),
        }
        assert_eq!(hub.stats().notifications_dropped, 6);
    }

    #[tokio::test]
    async fn test_stats_track_subscribers() {
        let hub = NotificationHub::new(8);
        let rx = hub.subscribe();
        assert_eq!(hub.stats().active_subscribers, 1);
        drop(rx);
        assert_eq!(hub.stats().active_subscribers, 0);
        assert_eq!(hub.capacity(), 8);
    }
}
