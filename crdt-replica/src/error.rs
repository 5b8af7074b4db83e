//! Replica error taxonomy.
//!
//! ```text
//! Bootstrap          initial bulk read or local bulk write failed
//! Durability         local write failed; the write is not acknowledged
//! RemoteWrite        a propagated change was rejected (logged, not retried)
//! NotFound           point read for an unknown id
//! ListenerDisconnect notification feed ended while the store was running
//! Finalized          write attempted after finalize()
//! ```

use crate::document::DocumentError;
use crate::gateway::GatewayError;
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Local write for '{id}' failed: {source}")]
    Durability {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("Remote upsert for '{id}' failed: {source}")]
    RemoteWrite {
        id: String,
        #[source]
        source: GatewayError,
    },

    #[error("Object '{0}' not found")]
    NotFound(String),

    #[error("Notification feed disconnected")]
    ListenerDisconnect,

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Remote read failed: {0}")]
    RemoteRead(#[from] GatewayError),

    #[error("Local read failed: {0}")]
    LocalRead(#[source] StoreError),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Store has been finalized")]
    Finalized,

    #[error("Closing local store failed: {0}")]
    LocalClose(#[source] StoreError),
}

impl ReplicaError {
    /// Map a local read failure, keeping "missing" distinct from "broken".
    pub fn from_local_read(id: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ReplicaError::NotFound(id.to_string()),
            other => ReplicaError::LocalRead(other),
        }
    }
}
