//! Replicated string list (sequence CRDT).

use std::collections::HashMap;
use std::sync::Arc;
use yrs::{Any, Array, ReadTxn, Transact, WriteTxn};

use super::{as_string, load_for_write, populate, random_value, read_all};
use crate::document::Document;
use crate::error::ReplicaError;
use crate::gateway::RemoteGateway;
use crate::store::ObjectStore;

const ROOT: &str = "l";

pub struct List {
    store: Arc<dyn ObjectStore>,
}

impl List {
    pub const PREFIX: &'static str = "l-";

    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: &str) -> Result<Vec<String>, ReplicaError> {
        Ok(values(&self.store.get(id).await?))
    }

    pub async fn get_at(&self, id: &str, index: usize) -> Result<String, ReplicaError> {
        let doc = self.store.get(id).await?;
        let txn = doc.doc().transact();
        txn.get_array(ROOT)
            .and_then(|root| root.get(&txn, index as u32))
            .and_then(as_string)
            .ok_or_else(|| ReplicaError::InvalidValue(format!("index {index} out of bounds in {id}")))
    }

    /// Insert `value` before position `index` (`index == len` appends).
    pub async fn add(&self, id: &str, index: usize, value: &str) -> Result<(), ReplicaError> {
        let doc = load_for_write(self.store.as_ref(), id).await?;
        insert(&doc, index, value)?;
        self.store.apply_change(id, &doc).await
    }

    pub async fn append(&self, id: &str, value: &str) -> Result<(), ReplicaError> {
        let doc = load_for_write(self.store.as_ref(), id).await?;
        {
            let mut txn = doc.doc().transact_mut();
            let root = txn.get_or_insert_array(ROOT);
            root.push_back(&mut txn, Any::String(value.into()));
        }
        self.store.apply_change(id, &doc).await
    }

    pub async fn prepend(&self, id: &str, value: &str) -> Result<(), ReplicaError> {
        self.add(id, 0, value).await
    }

    pub async fn rmv(&self, id: &str, index: usize) -> Result<(), ReplicaError> {
        let doc = load_for_write(self.store.as_ref(), id).await?;
        {
            let mut txn = doc.doc().transact_mut();
            let root = txn.get_or_insert_array(ROOT);
            let len = root.len(&txn) as usize;
            if index >= len {
                return Err(ReplicaError::InvalidValue(format!(
                    "index {index} out of bounds in {id} (len {len})"
                )));
            }
            root.remove(&mut txn, index as u32);
        }
        self.store.apply_change(id, &doc).await
    }

    pub async fn clear(&self, id: &str) -> Result<(), ReplicaError> {
        let doc = load_for_write(self.store.as_ref(), id).await?;
        {
            let mut txn = doc.doc().transact_mut();
            let root = txn.get_or_insert_array(ROOT);
            let len = root.len(&txn);
            if len > 0 {
                root.remove_range(&mut txn, 0, len);
            }
        }
        self.store.apply_change(id, &doc).await
    }

    pub async fn get_all(&self) -> Result<HashMap<String, Vec<String>>, ReplicaError> {
        Ok(read_all(self.store.get_all_by_prefix(Self::PREFIX).await?, values))
    }

    pub async fn get_multiple(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>, ReplicaError> {
        Ok(read_all(self.store.get_multiple(ids).await?, values))
    }

    /// Seed `items` lists of `size` random values.
    pub async fn populate(
        gateway: &dyn RemoteGateway,
        items: usize,
        size: usize,
        value_length: usize,
    ) -> Result<usize, ReplicaError> {
        let seed = Document::new();
        {
            let mut txn = seed.doc().transact_mut();
            let root = txn.get_or_insert_array(ROOT);
            for _ in 0..size {
                root.push_back(&mut txn, Any::String(random_value(value_length).into()));
            }
        }
        populate(gateway, Self::PREFIX, items, &seed).await
    }
}

pub fn values(doc: &Document) -> Vec<String> {
    let txn = doc.doc().transact();
    let Some(root) = txn.get_array(ROOT) else {
        return Vec::new();
    };
    root.iter(&txn).filter_map(as_string).collect()
}

/// Bounds-checked insert.
pub fn insert(doc: &Document, index: usize, value: &str) -> Result<(), ReplicaError> {
    let mut txn = doc.doc().transact_mut();
    let root = txn.get_or_insert_array(ROOT);
    let len = root.len(&txn) as usize;
    if index > len {
        return Err(ReplicaError::InvalidValue(format!(
            "insert index {index} out of bounds (len {len})"
        )));
    }
    root.insert(&mut txn, index as u32, Any::String(value.into()));
    Ok(())
}
