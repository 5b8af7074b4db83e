//! CRDT data types on top of an [`ObjectStore`].
//!
//! Each type owns an id prefix and one root collection inside the document:
//!
//! ```text
//! type      prefix  root           encoding
//! Counter   c-      map   "c"      writer client id → i64 contribution (sum = value)
//! Register  r-      map   "r"      "value" → string (last writer wins)
//! Set       s-      map   "s"      element → true
//! Map       m-      map   "m"      key → string
//! List      l-      array "l"      strings
//! ```
//!
//! Every mutation is read-modify-commit: fetch the document, edit it, and
//! hand it back through `apply_change`. Writes to an id the store has never
//! seen start from an empty document.

use std::collections::HashMap;
use uuid::Uuid;
use yrs::{Any, Out};

use crate::document::Document;
use crate::error::ReplicaError;
use crate::gateway::RemoteGateway;
use crate::store::ObjectStore;

pub mod counter;
pub mod list;
pub mod map;
pub mod register;
pub mod set;

pub use counter::Counter;
pub use list::List;
pub use map::Map;
pub use register::Register;
pub use set::Set;

/// Origin tag used for seed data.
pub const POPULATE_ORIGIN: &str = "populate";

/// Fetch a document for mutation; unknown ids yield an empty document.
pub(crate) async fn load_for_write(store: &dyn ObjectStore, id: &str) -> Result<Document, ReplicaError> {
    match store.get(id).await {
        Ok(doc) => Ok(doc),
        Err(ReplicaError::NotFound(_)) => Ok(Document::new()),
        Err(e) => Err(e),
    }
}

/// Apply `read` to every document of a bulk result.
pub(crate) fn read_all<T>(
    documents: HashMap<String, Document>,
    read: impl Fn(&Document) -> T,
) -> HashMap<String, T> {
    documents
        .into_iter()
        .map(|(id, doc)| {
            let value = read(&doc);
            (id, value)
        })
        .collect()
}

pub(crate) fn as_string(out: Out) -> Option<String> {
    match out {
        Out::Any(Any::String(s)) => Some(s.to_string()),
        _ => None,
    }
}

/// Write the same seed document under `<prefix>0 .. <prefix>{items - 1}`.
///
/// Returns the number of documents written.
pub async fn populate(
    gateway: &dyn RemoteGateway,
    prefix: &str,
    items: usize,
    seed: &Document,
) -> Result<usize, ReplicaError> {
    let snapshot = seed.save();
    for i in 0..items {
        let id = format!("{prefix}{i}");
        gateway
            .upsert(&id, &snapshot, POPULATE_ORIGIN)
            .await
            .map_err(|source| ReplicaError::RemoteWrite { id, source })?;
    }
    log::info!("Populated {items} documents with prefix {prefix}");
    Ok(items)
}

/// Random alphanumeric value of exactly `len` characters.
pub fn random_value(len: usize) -> String {
    let mut value = String::with_capacity(len);
    while value.len() < len {
        value.push_str(&Uuid::new_v4().simple().to_string());
    }
    value.truncate(len);
    value
}
