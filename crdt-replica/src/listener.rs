//! Notification listener: merges other replicas' writes into the cache.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::DocumentCache;
use crate::config::Granularity;
use crate::error::ReplicaError;
use crate::gateway::Subscription;
use crate::stats::ReplicaCounters;

/// Start the single listener task.
///
/// Notifications tagged with `origin` are our own echoes and are skipped.
/// If the feed disconnects the listener logs it and idles until shutdown;
/// it never reconnects. The handle resolves to the subscription so the
/// owner can close it after the task has stopped.
pub fn spawn_listener(
    mut subscription: Subscription,
    cache: Arc<DocumentCache>,
    origin: String,
    granularity: Granularity,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<ReplicaCounters>,
) -> JoinHandle<Subscription> {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = subscription.recv() => match next {
                    Some(notification) => {
                        if notification.origin == origin {
                            ReplicaCounters::bump(&counters.notifications_skipped);
                            continue;
                        }
                        match cache.merge_remote(&notification, granularity).await {
                            Ok(()) => {
                                log::trace!(
                                    "Merged {:?} for {} from {}",
                                    notification.kind,
                                    notification.object_id,
                                    notification.origin
                                );
                                ReplicaCounters::bump(&counters.notifications_applied);
                            }
                            Err(e) => {
                                log::warn!("Failed to merge notification for {}: {e}", notification.object_id);
                                ReplicaCounters::bump(&counters.notification_failures);
                            }
                        }
                    }
                    None => {
                        log::warn!("{}", ReplicaError::ListenerDisconnect);
                        let _ = shutdown.wait_for(|stop| *stop).await;
                        break;
                    }
                },
            }
        }
        subscription
    })
}
