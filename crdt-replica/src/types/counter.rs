//! PN counter.
//!
//! Each increment is recorded under the client id of the document instance
//! that made it, so concurrent increments from different writers never
//! overwrite each other. The counter value is the sum of all entries.

use std::collections::HashMap;
use std::sync::Arc;
use yrs::{Any, Map as _, Out, ReadTxn, Transact, WriteTxn};

use super::{load_for_write, populate, read_all};
use crate::document::Document;
use crate::error::ReplicaError;
use crate::gateway::RemoteGateway;
use crate::store::ObjectStore;

const ROOT: &str = "c";

pub struct Counter {
    store: Arc<dyn ObjectStore>,
}

impl Counter {
    pub const PREFIX: &'static str = "c-";

    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: &str) -> Result<i64, ReplicaError> {
        Ok(value(&self.store.get(id).await?))
    }

    pub async fn inc(&self, id: &str, delta: i64) -> Result<(), ReplicaError> {
        let doc = load_for_write(self.store.as_ref(), id).await?;
        add(&doc, delta);
        self.store.apply_change(id, &doc).await
    }

    pub async fn dec(&self, id: &str, delta: i64) -> Result<(), ReplicaError> {
        self.inc(id, -delta).await
    }

    pub async fn get_all(&self) -> Result<HashMap<String, i64>, ReplicaError> {
        Ok(read_all(self.store.get_all_by_prefix(Self::PREFIX).await?, value))
    }

    pub async fn get_multiple(&self, ids: &[String]) -> Result<HashMap<String, i64>, ReplicaError> {
        Ok(read_all(self.store.get_multiple(ids).await?, value))
    }

    /// Seed `items` counters at zero.
    pub async fn populate(gateway: &dyn RemoteGateway, items: usize) -> Result<usize, ReplicaError> {
        populate(gateway, Self::PREFIX, items, &Document::new()).await
    }
}

/// Current counter value of `doc`.
pub fn value(doc: &Document) -> i64 {
    let txn = doc.doc().transact();
    let Some(entries) = txn.get_map(ROOT) else {
        return 0;
    };
    entries
        .iter(&txn)
        .map(|(_, out)| match out {
            Out::Any(Any::BigInt(n)) => n,
            Out::Any(Any::Number(n)) => n as i64,
            _ => 0,
        })
        .sum()
}

/// Add `delta` to this document instance's own contribution.
pub fn add(doc: &Document, delta: i64) {
    let key = doc.doc().client_id().to_string();
    let mut txn = doc.doc().transact_mut();
    let entries = txn.get_or_insert_map(ROOT);
    let current = match entries.get(&txn, &key) {
        Some(Out::Any(Any::BigInt(n))) => n,
        _ => 0,
    };
    entries.insert(&mut txn, key, Any::BigInt(current + delta));
}
