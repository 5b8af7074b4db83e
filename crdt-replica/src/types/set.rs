//! Add-wins string set stored as the key set of a map.

use std::collections::HashMap;
use std::sync::Arc;
use yrs::{Any, Map as _, ReadTxn, Transact, WriteTxn};

use super::{load_for_write, populate, read_all};
use crate::document::Document;
use crate::error::ReplicaError;
use crate::gateway::RemoteGateway;
use crate::store::ObjectStore;

const ROOT: &str = "s";

pub struct Set {
    store: Arc<dyn ObjectStore>,
}

impl Set {
    pub const PREFIX: &'static str = "s-";

    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn contains(&self, id: &str, element: &str) -> Result<bool, ReplicaError> {
        Ok(contains(&self.store.get(id).await?, element))
    }

    /// Elements in ascending order.
    pub async fn get(&self, id: &str) -> Result<Vec<String>, ReplicaError> {
        Ok(elements(&self.store.get(id).await?))
    }

    pub async fn add(&self, id: &str, element: &str) -> Result<(), ReplicaError> {
        let doc = load_for_write(self.store.as_ref(), id).await?;
        insert(&doc, element);
        self.store.apply_change(id, &doc).await
    }

    pub async fn rmv(&self, id: &str, element: &str) -> Result<(), ReplicaError> {
        let doc = load_for_write(self.store.as_ref(), id).await?;
        {
            let mut txn = doc.doc().transact_mut();
            let root = txn.get_or_insert_map(ROOT);
            root.remove(&mut txn, element);
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

    pub async fn get_all(&self) -> Result<HashMap<String, Vec<String>>, ReplicaError> {
        Ok(read_all(self.store.get_all_by_prefix(Self::PREFIX).await?, elements))
    }

    pub async fn get_multiple(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>, ReplicaError> {
        Ok(read_all(self.store.get_multiple(ids).await?, elements))
    }

    /// Seed `items` sets holding the elements `"0" .. "{size - 1}"`.
    pub async fn populate(
        gateway: &dyn RemoteGateway,
        items: usize,
        size: usize,
    ) -> Result<usize, ReplicaError> {
        let seed = Document::new();
        {
            let mut txn = seed.doc().transact_mut();
            let root = txn.get_or_insert_map(ROOT);
            for i in 0..size {
                root.insert(&mut txn, i.to_string(), Any::Bool(true));
            }
        }
        populate(gateway, Self::PREFIX, items, &seed).await
    }
}

pub fn elements(doc: &Document) -> Vec<String> {
    let txn = doc.doc().transact();
    let Some(root) = txn.get_map(ROOT) else {
        return Vec::new();
    };
    let mut out: Vec<String> = root.keys(&txn).map(str::to_string).collect();
    out.sort();
    out
}

pub fn contains(doc: &Document, element: &str) -> bool {
    let txn = doc.doc().transact();
    txn.get_map(ROOT)
        .is_some_and(|root| root.contains_key(&txn, element))
}

pub fn insert(doc: &Document, element: &str) {
    let mut txn = doc.doc().transact_mut();
    let root = txn.get_or_insert_map(ROOT);
    root.insert(&mut txn, element, Any::Bool(true));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_contains_elements() {
        let doc = Document::new();
        insert(&doc, "b");
        insert(&doc, "a");
        insert(&doc, "a");
        assert!(contains(&doc, "a"));
        assert!(!contains(&doc, "z"));
        assert_eq!(elements(&doc), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_concurrent_adds_union() {
        let a = Document::new();
        let b = Document::new();
        insert(&a, "x");
        insert(&b, "y");
        a.merge(&b).unwrap();
        assert_eq!(elements(&a), vec!["x".to_string(), "y".to_string()]);
    }
}
