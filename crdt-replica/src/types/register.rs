//! Last-writer-wins string register.

use std::collections::HashMap;
use std::sync::Arc;
use yrs::{Any, Map as _, ReadTxn, Transact, WriteTxn};

use super::{as_string, load_for_write, populate, random_value, read_all};
use crate::document::Document;
use crate::error::ReplicaError;
use crate::gateway::RemoteGateway;
use crate::store::ObjectStore;

const ROOT: &str = "r";
const SLOT: &str = "value";

pub struct Register {
    store: Arc<dyn ObjectStore>,
}

impl Register {
    pub const PREFIX: &'static str = "r-";

    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Current value, `None` if the register was never set.
    pub async fn get(&self, id: &str) -> Result<Option<String>, ReplicaError> {
        Ok(value(&self.store.get(id).await?))
    }

    pub async fn set(&self, id: &str, value: &str) -> Result<(), ReplicaError> {
        let doc = load_for_write(self.store.as_ref(), id).await?;
        assign(&doc, value);
        self.store.apply_change(id, &doc).await
    }

    pub async fn get_all(&self) -> Result<HashMap<String, Option<String>>, ReplicaError> {
        Ok(read_all(self.store.get_all_by_prefix(Self::PREFIX).await?, value))
    }

    pub async fn get_multiple(&self, ids: &[String]) -> Result<HashMap<String, Option<String>>, ReplicaError> {
        Ok(read_all(self.store.get_multiple(ids).await?, value))
    }

    /// Seed `items` registers holding one random value of `value_length` characters.
    pub async fn populate(
        gateway: &dyn RemoteGateway,
        items: usize,
        value_length: usize,
    ) -> Result<usize, ReplicaError> {
        let seed = Document::new();
        assign(&seed, &random_value(value_length));
        populate(gateway, Self::PREFIX, items, &seed).await
    }
}

pub fn value(doc: &Document) -> Option<String> {
    let txn = doc.doc().transact();
    let root = txn.get_map(ROOT)?;
    root.get(&txn, SLOT).and_then(as_string)
}

pub fn assign(doc: &Document, value: &str) {
    let mut txn = doc.doc().transact_mut();
    let root = txn.get_or_insert_map(ROOT);
    root.insert(&mut txn, SLOT, Any::String(value.into()));
}
