//! String → string map with last-writer-wins values per key.

use std::collections::HashMap;
use std::sync::Arc;
use yrs::{Any, Map as _, ReadTxn, Transact, WriteTxn};

use super::{as_string, load_for_write, populate, random_value, read_all};
use crate::document::Document;
use crate::error::ReplicaError;
use crate::gateway::RemoteGateway;
use crate::store::ObjectStore;

const ROOT: &str = "m";

pub struct Map {
    store: Arc<dyn ObjectStore>,
}

impl Map {
    pub const PREFIX: &'static str = "m-";

    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: &str) -> Result<HashMap<String, String>, ReplicaError> {
        Ok(entries(&self.store.get(id).await?))
    }

    /// Value under `key`, `None` if absent.
    pub async fn value(&self, id: &str, key: &str) -> Result<Option<String>, ReplicaError> {
        let doc = self.store.get(id).await?;
        let txn = doc.doc().transact();
        Ok(txn
            .get_map(ROOT)
            .and_then(|root| root.get(&txn, key))
            .and_then(as_string))
    }

    pub async fn contains(&self, id: &str, key: &str) -> Result<bool, ReplicaError> {
        let doc = self.store.get(id).await?;
        let txn = doc.doc().transact();
        Ok(txn
            .get_map(ROOT)
            .is_some_and(|root| root.contains_key(&txn, key)))
    }

    pub async fn put(&self, id: &str, key: &str, value: &str) -> Result<(), ReplicaError> {
        let doc = load_for_write(self.store.as_ref(), id).await?;
        {
            let mut txn = doc.doc().transact_mut();
            let root = txn.get_or_insert_map(ROOT);
            root.insert(&mut txn, key, Any::String(value.into()));
        }
        self.store.apply_change(id, &doc).await
    }

    pub async fn rmv(&self, id: &str, key: &str) -> Result<(), ReplicaError> {
        let doc = load_for_write(self.store.as_ref(), id).await?;
        {
            let mut txn = doc.doc().transact_mut();
            let root = txn.get_or_insert_map(ROOT);
            root.remove(&mut txn, key);
        }
        self.store.apply_change(id, &doc).await
    }

    pub async fn clear(&self, id: &str) -> Result<(), ReplicaError> {
        let doc = load_for_write(self.store.as_ref(), id).await?;
        {
            let mut txn = doc.doc().transact_mut();
            let root = txn.get_or_insert_map(ROOT);
            root.clear(&mut txn);
        }
        self.store.apply_change(id, &doc).await
    }

    pub async fn get_all(&self) -> Result<HashMap<String, HashMap<String, String>>, ReplicaError> {
        Ok(read_all(self.store.get_all_by_prefix(Self::PREFIX).await?, entries))
    }

    pub async fn get_multiple(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, String>>, ReplicaError> {
        Ok(read_all(self.store.get_multiple(ids).await?, entries))
    }

    /// Seed `items` maps with keys `"0" .. "{size - 1}"` and random values.
    pub async fn populate(
        gateway: &dyn RemoteGateway,
        items: usize,
        size: usize,
        value_length: usize,
    ) -> Result<usize, ReplicaError> {
        let seed = Document::new();
        {
            let mut txn = seed.doc().transact_mut();
            let root = txn.get_or_insert_map(ROOT);
            for i in 0..size {
                root.insert(&mut txn, i.to_string(), Any::String(random_value(value_length).into()));
            }
        }
        populate(gateway, Self::PREFIX, items, &seed).await
    }
}

pub fn entries(doc: &Document) -> HashMap<String, String> {
    let txn = doc.doc().transact();
    let Some(root) = txn.get_map(ROOT) else {
        return HashMap::new();
    };
    root.iter(&txn)
        .filter_map(|(key, out)| as_string(out).map(|value| (key.to_string(), value)))
        .collect()
}
