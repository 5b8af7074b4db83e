//! In-process gateway: calls an [`Authority`] directly.
//!
//! Used by tests and benchmarks to run several replicas against one remote
//! store without sockets. Notification delivery goes through the same
//! broadcast hub and encoded frames as the WebSocket server.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use super::{GatewayError, RemoteGateway, Subscription};
use crate::authority::Authority;
use crate::protocol::Frame;

#[derive(Clone)]
pub struct MemoryGateway {
    authority: Arc<Authority>,
}

impl MemoryGateway {
    pub fn new(authority: Arc<Authority>) -> Self {
        Self { authority }
    }

    pub fn authority(&self) -> &Arc<Authority> {
        &self.authority
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, GatewayError> {
        Ok(self.authority.get(id).await)
    }

    async fn upsert(&self, id: &str, change: &[u8], origin: &str) -> Result<(), GatewayError> {
        self.authority
            .upsert(id, change, origin)
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::Rejected(e.to_string()))
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        Ok(self.authority.get_by_prefix(prefix).await)
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        Ok(self.authority.get_many(ids).await)
    }

    async fn get_all(&self) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        Ok(self.authority.get_all().await)
    }

    async fn subscribe(&self, capacity: usize) -> Result<Subscription, GatewayError> {
        if capacity == 0 {
            return Err(GatewayError::InvalidCapacity);
        }
        let mut feed = self.authority.subscribe();
        let hub = self.authority.hub().clone();
        let (tx, rx) = mpsc::channel(capacity);

        let task = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(bytes) => match Frame::decode(&bytes) {
                        Ok(Frame::Notification(n)) => {
                            if tx.send(n).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("Dropping undecodable notification: {e}"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("In-process subscriber lagged by {n} notifications");
                        hub.record_dropped(n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx, Some(task)))
    }
}
