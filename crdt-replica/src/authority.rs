//! Authoritative in-memory document table.
//!
//! ```text
//! upsert(id, change, origin)
//!   │
//!   ├── id unknown → insert load(change)         → Notification::Insert (snapshot)
//!   └── id known   → load_incremental(change)    → Notification::Update
//!                                                     operation: the change
//!                                                     state:     full snapshot
//!                                  │
//!                                  ▼
//!                          NotificationHub ──► every subscriber
//! ```
//!
//! Notifications are published after the table lock is released and never
//! block the writer.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use crate::broadcast::NotificationHub;
use crate::config::Granularity;
use crate::document::{Document, DocumentError};
use crate::protocol::{Notification, NotificationKind};

/// The remote store's state: id → document plus a notification hub.
pub struct Authority {
    documents: RwLock<HashMap<String, Document>>,
    hub: Arc<NotificationHub>,
    granularity: Granularity,
}

impl Authority {
    pub fn new(granularity: Granularity, notification_capacity: usize) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            hub: Arc::new(NotificationHub::new(notification_capacity)),
            granularity,
        }
    }

    /// Merge `change` into the stored document, creating it if absent.
    ///
    /// Returns the kind of notification that was published.
    pub async fn upsert(
        &self,
        id: &str,
        change: &[u8],
        origin: &str,
    ) -> Result<NotificationKind, DocumentError> {
        let (kind, payload) = {
            let mut documents = self.documents.write().await;
            match documents.get(id) {
                Some(doc) => {
                    doc.load_incremental(change)?;
                    let payload = match self.granularity {
                        Granularity::Operation => change.to_vec(),
                        Granularity::State => doc.save(),
                    };
                    (NotificationKind::Update, payload)
                }
                None => {
                    let doc = Document::load(change)?;
                    let snapshot = doc.save();
                    documents.insert(id.to_string(), doc);
                    (NotificationKind::Insert, snapshot)
                }
            }
        };

        let notification = Notification {
            kind,
            object_id: id.to_string(),
            origin: origin.to_string(),
            payload,
        };
        if let Err(e) = self.hub.publish(&notification) {
            log::error!("Failed to publish notification for {id}: {e}");
        }
        Ok(kind)
    }

    /// Snapshot of one document.
    pub async fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.documents.read().await.get(id).map(Document::save)
    }

    pub async fn get_by_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.documents
            .read()
            .await
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(id, doc)| (id.clone(), doc.save()))
            .collect()
    }

    /// Snapshots for the known ids among `ids`.
    pub async fn get_many(&self, ids: &[String]) -> Vec<(String, Vec<u8>)> {
        let documents = self.documents.read().await;
        ids.iter()
            .filter_map(|id| documents.get(id).map(|doc| (id.clone(), doc.save())))
            .collect()
    }

    pub async fn get_all(&self) -> Vec<(String, Vec<u8>)> {
        self.documents
            .read()
            .await
            .iter()
            .map(|(id, doc)| (id.clone(), doc.save()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// New notification feed; receives encoded `Frame::Notification`s.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.hub.subscribe()
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }
}
