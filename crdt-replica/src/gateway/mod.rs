//! Access to the authoritative remote store.
//!
//! ```text
//!                     ┌──────────────────────┐
//! ObjectStore ──────► │ dyn RemoteGateway    │
//!                     ├──────────────────────┤
//!                     │ WsGateway            │──► AuthorityServer (WebSocket)
//!                     │ MemoryGateway        │──► Arc<Authority> (in process)
//!                     └──────────────────────┘
//! ```
//!
//! Both implementations speak the same contract: snapshot reads, merge-or-insert
//! upserts tagged with an origin, and a notification [`Subscription`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::{Notification, ProtocolError};

pub mod memory;
pub mod ws;

pub use memory::MemoryGateway;
pub use ws::WsGateway;

/// Remote store access errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Remote rejected request: {0}")]
    Rejected(String),
    #[error("Unexpected response, expected {0}")]
    UnexpectedResponse(&'static str),
    #[error("Gateway closed")]
    Closed,
    #[error("Subscription capacity must be greater than zero")]
    InvalidCapacity,
}

/// Remote store operations used by both store modes.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Snapshot of one document, `None` if the id is unknown.
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, GatewayError>;

    /// Merge `change` into the stored document (insert if absent) and
    /// publish a notification tagged with `origin`.
    async fn upsert(&self, id: &str, change: &[u8], origin: &str) -> Result<(), GatewayError>;

    async fn get_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, GatewayError>;

    /// Snapshots for the known ids among `ids`.
    async fn get_many(&self, ids: &[String]) -> Result<Vec<(String, Vec<u8>)>, GatewayError>;

    async fn get_all(&self) -> Result<Vec<(String, Vec<u8>)>, GatewayError>;

    /// Open a notification feed. Only notifications committed after this
    /// call returns are guaranteed to be delivered.
    async fn subscribe(&self, capacity: usize) -> Result<Subscription, GatewayError>;
}

/// A live notification feed.
///
/// `recv` returns `None` once the feed is closed or disconnected. Dropping
/// the subscription stops its reader task.
pub struct Subscription {
    rx: mpsc::Receiver<Notification>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Notification>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Stop the feed. Buffered notifications are discarded.
    pub fn close(&mut self) {
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NotificationKind;

    #[tokio::test]
    async fn test_subscription_recv_then_close() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = Subscription::new(rx, None);

        tx.send(Notification {
            kind: NotificationKind::Insert,
            object_id: "c-1".into(),
            origin: "o".into(),
            payload: vec![],
        })
        .await
        .unwrap();

        assert_eq!(sub.recv().await.unwrap().object_id, "c-1");
        sub.close();
        assert!(sub.recv().await.is_none());
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_subscription_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::channel::<Notification>(4);
        let mut sub = Subscription::new(rx, None);
        drop(tx);
        assert!(sub.recv().await.is_none());
    }
}
