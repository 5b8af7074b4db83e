//! CRDT document handle backed by a Yrs `Doc`.
//!
//! The replica never interprets document contents. Everything it needs is
//! expressed through a handful of operations:
//!
//! ```text
//!   load(bytes) ──► Document ──► save() ──► bytes
//!                      │
//!                      ├── merge(other)           (commutative, idempotent)
//!                      ├── head_marker()          (encoded state vector)
//!                      ├── change_since(marker)   (v1 update diff)
//!                      └── load_incremental(diff)
//! ```
//!
//! A `Document` remembers the state vector it had when it was loaded, so the
//! write path can extract exactly the edits a caller made to it
//! ([`Document::latest_change`]).

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

/// Document encoding/merge errors.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document decode error: {0}")]
    Decode(String),
    #[error("Document update rejected: {0}")]
    Apply(String),
}

impl From<yrs::encoding::read::Error> for DocumentError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        DocumentError::Decode(e.to_string())
    }
}

/// Position in a document's history (v1-encoded Yrs state vector).
///
/// An empty marker means "nothing known", so `change_since` of an empty
/// marker yields the full document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Marker(Vec<u8>);

impl Marker {
    fn from_state_vector(sv: &StateVector) -> Self {
        Self(sv.encode_v1())
    }

    fn state_vector(&self) -> Result<StateVector, DocumentError> {
        if self.0.is_empty() {
            return Ok(StateVector::default());
        }
        Ok(StateVector::decode_v1(&self.0)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A CRDT document plus the marker it was loaded at.
pub struct Document {
    doc: Doc,
    /// State vector at load time; edits after this point form the latest change
    base: StateVector,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self {
            doc: Doc::new(),
            base: StateVector::default(),
        }
    }

    /// Rebuild a document from bytes produced by [`Document::save`] or
    /// [`Document::change_since`]. Empty input yields an empty document.
    pub fn load(bytes: &[u8]) -> Result<Self, DocumentError> {
        let doc = Doc::new();
        if !bytes.is_empty() {
            let update = Update::decode_v1(bytes)?;
            let mut txn = doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| DocumentError::Apply(e.to_string()))?;
        }
        let base = doc.transact().state_vector();
        Ok(Self { doc, base })
    }

    /// Full document state as a v1 update.
    pub fn save(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Merge everything `other` knows that this document does not.
    pub fn merge(&self, other: &Document) -> Result<(), DocumentError> {
        let sv = self.doc.transact().state_vector();
        let diff = {
            let txn = other.doc.transact();
            txn.encode_diff_v1(&sv)
        };
        self.load_incremental(&diff)
    }

    /// Marker for the current head of this document.
    pub fn head_marker(&self) -> Marker {
        let txn = self.doc.transact();
        Marker::from_state_vector(&txn.state_vector())
    }

    /// Encode every edit made after `marker`.
    pub fn change_since(&self, marker: &Marker) -> Result<Vec<u8>, DocumentError> {
        let sv = marker.state_vector()?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Edits made since this document was loaded, or `None` if untouched.
    pub fn latest_change(&self) -> Option<Vec<u8>> {
        let txn = self.doc.transact();
        if txn.state_vector() == self.base {
            return None;
        }
        Some(txn.encode_state_as_update_v1(&self.base))
    }

    /// Apply an incremental change produced by another replica.
    pub fn load_incremental(&self, bytes: &[u8]) -> Result<(), DocumentError> {
        let update = Update::decode_v1(bytes)?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocumentError::Apply(e.to_string()))
    }

    /// Independent copy. Cloning the inner `Doc` would share state.
    pub fn deep_clone(&self) -> Result<Self, DocumentError> {
        Self::load(&self.save())
    }

    /// Underlying Yrs document, for type facades that mutate contents.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("client_id", &self.doc.client_id())
            .finish_non_exhaustive()
    }
}
