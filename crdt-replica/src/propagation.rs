//! Outbound propagation of local changes to the remote store.
//!
//! ```text
//! apply_change ──► PropagationQueue (bounded mpsc) ──► worker ──► gateway.upsert
//!                       │                                │
//!                 full: caller waits               failure: logged, counted,
//!                                                  never retried
//! ```
//!
//! On shutdown the worker exits without draining. Changes still queued are
//! dropped and reported through the worker's `JoinHandle`.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::ReplicaError;
use crate::gateway::RemoteGateway;
use crate::stats::ReplicaCounters;

/// One unit of outbound replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub id: String,
    /// Incremental change or full snapshot, per granularity
    pub bytes: Vec<u8>,
}

/// Producer side of the propagation queue.
pub struct PropagationQueue {
    tx: mpsc::Sender<Change>,
    counters: Arc<ReplicaCounters>,
}

impl PropagationQueue {
    pub fn new(capacity: usize, counters: Arc<ReplicaCounters>) -> (Self, mpsc::Receiver<Change>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, counters }, rx)
    }

    /// Queue a change, waiting for space when the queue is full.
    pub async fn enqueue(&self, change: Change) -> Result<(), ReplicaError> {
        self.tx
            .send(change)
            .await
            .map_err(|_| ReplicaError::Finalized)?;
        ReplicaCounters::bump(&self.counters.changes_enqueued);
        Ok(())
    }

    /// Changes waiting for the worker.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Start the single propagation worker.
///
/// The handle resolves to the number of changes left in the queue when the
/// worker stopped.
pub fn spawn_worker(
    mut rx: mpsc::Receiver<Change>,
    gateway: Arc<dyn RemoteGateway>,
    origin: String,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<ReplicaCounters>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let change = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = rx.recv() => match next {
                    Some(change) => change,
                    None => break,
                },
            };

            // An in-flight upsert must not hold up shutdown
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    log::debug!("Abandoning in-flight upsert for {}", change.id);
                    break;
                }
                result = gateway.upsert(&change.id, &change.bytes, &origin) => match result {
                    Ok(()) => ReplicaCounters::bump(&counters.changes_propagated),
                    Err(source) => {
                        let err = ReplicaError::RemoteWrite { id: change.id, source };
                        log::error!("{err}");
                        ReplicaCounters::bump(&counters.propagation_failures);
                    }
                },
            }
        }

        rx.close();
        let dropped = rx.len();
        counters
            .changes_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
        if dropped > 0 {
            log::info!("Propagation worker stopped, {dropped} queued changes dropped");
        }
        dropped
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::config::Granularity;
    use crate::document::Document;
    use crate::gateway::MemoryGateway;
    use std::time::Duration;
    use tokio::time::timeout;

    fn change(id: &str) -> Change {
        Change {
            id: id.to_string(),
            bytes: Document::new().save(),
        }
    }

    #[tokio::test]
    async fn test_worker_propagates_in_order() {
        let authority = Arc::new(Authority::new(Granularity::Operation, 64));
        let gateway: Arc<dyn RemoteGateway> = Arc::new(MemoryGateway::new(authority.clone()));
        let counters = Arc::new(ReplicaCounters::default());
        let (queue, rx) = PropagationQueue::new(16, counters.clone());
        let (stop_tx, stop_rx) = watch::channel(false);

        let worker = spawn_worker(rx, gateway, "me".into(), stop_rx, counters.clone());
        for i in 0..5 {
            queue.enqueue(change(&format!("c-{i}"))).await.unwrap();
        }

        timeout(Duration::from_secs(2), async {
            while authority.len().await < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop_tx.send(true).unwrap();
        assert_eq!(worker.await.unwrap(), 0);
        assert_eq!(counters.snapshot(0, 0).changes_propagated, 5);
    }

    #[tokio::test]
    async fn test_full_queue_delays_caller() {
        let counters = Arc::new(ReplicaCounters::default());
        let (queue, mut rx) = PropagationQueue::new(2, counters);

        queue.enqueue(change("c-1")).await.unwrap();
        queue.enqueue(change("c-2")).await.unwrap();
        assert_eq!(queue.pending(), 2);

        // Third enqueue waits until a slot frees up
        let blocked = timeout(Duration::from_millis(50), queue.enqueue(change("c-3"))).await;
        assert!(blocked.is_err());

        assert_eq!(rx.recv().await.unwrap().id, "c-1");
        timeout(Duration::from_secs(1), queue.enqueue(change("c-3")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.capacity(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_after_worker_gone() {
        let counters = Arc::new(ReplicaCounters::default());
        let (queue, rx) = PropagationQueue::new(2, counters);
        drop(rx);
        assert!(matches!(
            queue.enqueue(change("c-1")).await,
            Err(ReplicaError::Finalized)
        ));
    }

    #[tokio::test]
    async fn test_stop_reports_dropped_changes() {
        let authority = Arc::new(Authority::new(Granularity::Operation, 64));
        let gateway: Arc<dyn RemoteGateway> = Arc::new(MemoryGateway::new(authority.clone()));
        let counters = Arc::new(ReplicaCounters::default());
        let (queue, rx) = PropagationQueue::new(16, counters.clone());
        let (stop_tx, stop_rx) = watch::channel(false);

        // Stop before the worker ever runs
        stop_tx.send(true).unwrap();
        for i in 0..3 {
            queue.enqueue(change(&format!("c-{i}"))).await.unwrap();
        }

        let worker = spawn_worker(rx, gateway, "me".into(), stop_rx, counters.clone());
        assert_eq!(timeout(Duration::from_secs(1), worker).await.unwrap().unwrap(), 3);
        assert!(authority.is_empty().await);
        assert_eq!(counters.snapshot(0, 0).changes_dropped, 3);
    }
}
