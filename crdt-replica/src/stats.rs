//! Replica counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a local-first replica.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    /// Documents held in the cache
    pub cached_documents: usize,
    /// Changes accepted into the propagation queue
    pub changes_enqueued: u64,
    /// Changes acknowledged by the remote store
    pub changes_propagated: u64,
    /// Changes the remote store rejected or never received
    pub propagation_failures: u64,
    /// Changes still queued when the replica was finalized
    pub changes_dropped: u64,
    /// Remote notifications merged into the cache
    pub notifications_applied: u64,
    /// Notifications ignored because this replica wrote them
    pub notifications_skipped: u64,
    /// Notifications that could not be merged
    pub notification_failures: u64,
    /// Changes waiting in the queue right now
    pub queue_depth: usize,
}

/// Shared lock-free counters behind [`ReplicaStats`].
#[derive(Debug, Default)]
pub struct ReplicaCounters {
    pub(crate) changes_enqueued: AtomicU64,
    pub(crate) changes_propagated: AtomicU64,
    pub(crate) propagation_failures: AtomicU64,
    pub(crate) changes_dropped: AtomicU64,
    pub(crate) notifications_applied: AtomicU64,
    pub(crate) notifications_skipped: AtomicU64,
    pub(crate) notification_failures: AtomicU64,
}

impl ReplicaCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, cached_documents: usize, queue_depth: usize) -> ReplicaStats {
        ReplicaStats {
            cached_documents,
            changes_enqueued: self.changes_enqueued.load(Ordering::Relaxed),
            changes_propagated: self.changes_propagated.load(Ordering::Relaxed),
            propagation_failures: self.propagation_failures.load(Ordering::Relaxed),
            changes_dropped: self.changes_dropped.load(Ordering::Relaxed),
            notifications_applied: self.notifications_applied.load(Ordering::Relaxed),
            notifications_skipped: self.notifications_skipped.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            queue_depth,
        }
    }
}
