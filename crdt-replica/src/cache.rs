//! In-memory document cache of a local-first replica.
//!
//! The cache is the merge point for both directions of traffic:
//!
//! ```text
//! caller edit ──► commit_local ──┐
//!                                ├──► Mutex<HashMap<id, Document>> ──► LocalStore
//! notification ──► merge_remote ─┘
//! ```
//!
//! `commit_local` persists to the local store while still holding the cache
//! lock, so a local write and a concurrent remote merge can never interleave
//! their snapshots on disk.

use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::config::Granularity;
use crate::document::Document;
use crate::error::ReplicaError;
use crate::protocol::{Notification, NotificationKind};
use crate::storage::LocalStore;

#[derive(Default)]
pub struct DocumentCache {
    documents: Mutex<HashMap<String, Document>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a document loaded at bootstrap.
    pub async fn insert(&self, id: String, document: Document) {
        self.documents.lock().await.insert(id, document);
    }

    /// Merge a caller's document into the cache and persist the result.
    ///
    /// Nothing is acknowledged unless the local store accepted the write.
    pub async fn commit_local(
        &self,
        id: &str,
        document: &Document,
        local: &LocalStore,
    ) -> Result<(), ReplicaError> {
        let mut documents = self.documents.lock().await;
        // Merge into a copy; the cached entry only changes once the put succeeds
        let merged = match documents.get(id) {
            Some(cached) => cached.deep_clone()?,
            None => Document::new(),
        };
        merged.merge(document)?;
        local
            .put(id, &merged.save())
            .map_err(|source| ReplicaError::Durability {
                id: id.to_string(),
                source,
            })?;
        documents.insert(id.to_string(), merged);
        Ok(())
    }

    /// Merge a remote notification into the cache.
    ///
    /// The local store is not touched: remote state reaches disk the next
    /// time a local write to the same document is committed.
    pub async fn merge_remote(
        &self,
        notification: &Notification,
        granularity: Granularity,
    ) -> Result<(), ReplicaError> {
        let incremental = notification.kind == NotificationKind::Update
            && granularity == Granularity::Operation;
        let incoming = if incremental {
            None
        } else {
            Some(Document::load(&notification.payload)?)
        };

        let mut documents = self.documents.lock().await;
        match documents.get(&notification.object_id) {
            Some(cached) => match incoming {
                Some(snapshot) => cached.merge(&snapshot)?,
                None => cached.load_incremental(&notification.payload)?,
            },
            None => {
                // Unseen id: only cache it once the payload has applied cleanly
                let fresh = match incoming {
                    Some(snapshot) => snapshot,
                    None => {
                        let doc = Document::new();
                        doc.load_incremental(&notification.payload)?;
                        doc
                    }
                };
                documents.insert(notification.object_id.clone(), fresh);
            }
        }
        Ok(())
    }

    /// Independent copies of every cached document whose id starts with `prefix`.
    pub async fn get_by_prefix(&self, prefix: &str) -> Result<HashMap<String, Document>, ReplicaError> {
        let documents = self.documents.lock().await;
        let mut out = HashMap::new();
        for (id, doc) in documents.iter().filter(|(id, _)| id.starts_with(prefix)) {
            out.insert(id.clone(), doc.deep_clone()?);
        }
        Ok(out)
    }

    /// Independent copies of the cached documents among `ids`; missing ids are omitted.
    pub async fn get_many(&self, ids: &[String]) -> Result<HashMap<String, Document>, ReplicaError> {
        let documents = self.documents.lock().await;
        let mut out = HashMap::new();
        for id in ids {
            if let Some(doc) = documents.get(id) {
                out.insert(id.clone(), doc.deep_clone()?);
            }
        }
        Ok(out)
    }

    pub async fn snapshot(&self, id: &str) -> Option<Vec<u8>> {
        self.documents.lock().await.get(id).map(Document::save)
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
