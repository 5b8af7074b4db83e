//! Remote-only store: every call goes straight to the gateway.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{ObjectStore, load_all};
use crate::config::{Granularity, Mode};
use crate::document::Document;
use crate::error::ReplicaError;
use crate::gateway::RemoteGateway;

pub struct RemoteOnlyStore {
    gateway: Arc<dyn RemoteGateway>,
    origin: String,
    granularity: Granularity,
}

impl RemoteOnlyStore {
    pub fn new(gateway: Arc<dyn RemoteGateway>, granularity: Granularity) -> Self {
        let origin = Uuid::new_v4().to_string();
        log::info!("Opened remote-only store {origin}");
        Self {
            gateway,
            origin,
            granularity,
        }
    }
}

#[async_trait]
impl ObjectStore for RemoteOnlyStore {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn mode(&self) -> Mode {
        Mode::RemoteOnly
    }

    fn granularity(&self) -> Granularity {
        self.granularity
    }

    async fn get(&self, id: &str) -> Result<Document, ReplicaError> {
        match self.gateway.get(id).await? {
            Some(snapshot) => Ok(Document::load(&snapshot)?),
            None => Err(ReplicaError::NotFound(id.to_string())),
        }
    }

    async fn apply_change(&self, id: &str, document: &Document) -> Result<(), ReplicaError> {
        let Some(change) = document.latest_change() else {
            return Ok(());
        };
        self.gateway
            .upsert(id, &change, &self.origin)
            .await
            .map_err(|source| ReplicaError::RemoteWrite {
                id: id.to_string(),
                source,
            })
    }

    async fn get_all_by_prefix(&self, prefix: &str) -> Result<HashMap<String, Document>, ReplicaError> {
        load_all(self.gateway.get_by_prefix(prefix).await?)
    }

    async fn get_multiple(&self, ids: &[String]) -> Result<HashMap<String, Document>, ReplicaError> {
        load_all(self.gateway.get_many(ids).await?)
    }

    async fn finalize(&self) -> Result<(), ReplicaError> {
        log::debug!("Finalized remote-only store {}", self.origin);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::gateway::{GatewayError, MemoryGateway};
    use yrs::{Any, Map, Transact, WriteTxn};

    fn store() -> (Arc<Authority>, RemoteOnlyStore) {
        let authority = Arc::new(Authority::new(Granularity::Operation, 64));
        let gateway = Arc::new(MemoryGateway::new(authority.clone()));
        (authority, RemoteOnlyStore::new(gateway, Granularity::Operation))
    }

    fn edit(doc: &Document, key: &str) {
        let mut txn = doc.doc().transact_mut();
        let map = txn.get_or_insert_map("m");
        map.insert(&mut txn, key, Any::Bool(true));
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let (_, store) = store();
        assert!(matches!(store.get("m-1").await, Err(ReplicaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_apply_change_writes_through() {
        let (authority, store) = store();
        let doc = Document::new();
        edit(&doc, "a");
        store.apply_change("m-1", &doc).await.unwrap();
        assert_eq!(authority.len().await, 1);

        let fetched = store.get("m-1").await.unwrap();
        assert_eq!(fetched.save(), doc.save());
    }

    #[tokio::test]
    async fn test_unchanged_document_sends_nothing() {
        let (authority, store) = store();
        store.apply_change("m-1", &Document::new()).await.unwrap();
        assert!(authority.is_empty().await);
    }

    #[tokio::test]
    async fn test_bulk_reads() {
        let (_, store) = store();
        for id in ["m-1", "m-2", "s-1"] {
            let doc = Document::new();
            edit(&doc, id);
            store.apply_change(id, &doc).await.unwrap();
        }
        assert_eq!(store.get_all_by_prefix("m-").await.unwrap().len(), 2);
        let many = store
            .get_multiple(&["s-1".to_string(), "s-9".to_string()])
            .await
            .unwrap();
        assert_eq!(many.len(), 1);
    }

    struct RejectingGateway;

    #[async_trait]
    impl RemoteGateway for RejectingGateway {
        async fn get(&self, _: &str) -> Result<Option<Vec<u8>>, GatewayError> {
            Ok(None)
        }
        async fn upsert(&self, _: &str, _: &[u8], _: &str) -> Result<(), GatewayError> {
            Err(GatewayError::Rejected("read-only".into()))
        }
        async fn get_by_prefix(&self, _: &str) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
            Ok(Vec::new())
        }
        async fn get_many(&self, _: &[String]) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
            Ok(Vec::new())
        }
        async fn get_all(&self) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
            Ok(Vec::new())
        }
        async fn subscribe(&self, _: usize) -> Result<crate::gateway::Subscription, GatewayError> {
            Err(GatewayError::Closed)
        }
    }

    #[tokio::test]
    async fn test_remote_write_failure_surfaced() {
        let store = RemoteOnlyStore::new(Arc::new(RejectingGateway), Granularity::Operation);
        let doc = Document::new();
        edit(&doc, "a");
        match store.apply_change("m-1", &doc).await {
            Err(ReplicaError::RemoteWrite { id, .. }) => assert_eq!(id, "m-1"),
            other => panic!("expected RemoteWrite, got {other:?}"),
        }
    }
}
