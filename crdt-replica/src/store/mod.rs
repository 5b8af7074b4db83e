//! Object store facade consumed by the CRDT type shims.
//!
//! ```text
//!                 ┌───────────────────────────────────────────┐
//!  Counter  ──┐   │ dyn ObjectStore                           │
//!  Register ──┤   │                                           │
//!  Set      ──┼──►│ LocalFirstStore   cache + RocksDB + queue │──► RemoteGateway
//!  Map      ──┤   │ RemoteOnlyStore   direct remote calls     │──► RemoteGateway
//!  List     ──┘   └───────────────────────────────────────────┘
//! ```
//!
//! Both variants are built by [`open_store`], keyed on [`Mode`]. Handles are
//! owned by a [`StoreManager`], which finalizes them together.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Granularity, Mode, ReplicaConfig};
use crate::document::Document;
use crate::error::ReplicaError;
use crate::gateway::{RemoteGateway, WsGateway};

pub mod local_first;
pub mod manager;
pub mod remote_only;

pub use local_first::LocalFirstStore;
pub use manager::StoreManager;
pub use remote_only::RemoteOnlyStore;

/// Replicated document store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Origin tag attached to every write from this instance.
    fn origin(&self) -> &str;

    fn mode(&self) -> Mode;

    fn granularity(&self) -> Granularity;

    /// Point read. Fails with `NotFound` for unknown ids.
    async fn get(&self, id: &str) -> Result<Document, ReplicaError>;

    /// Commit the edits made to `document` since it was obtained from this store.
    async fn apply_change(&self, id: &str, document: &Document) -> Result<(), ReplicaError>;

    async fn get_all_by_prefix(&self, prefix: &str) -> Result<HashMap<String, Document>, ReplicaError>;

    /// Documents for the known ids among `ids`; missing ids are absent.
    async fn get_multiple(&self, ids: &[String]) -> Result<HashMap<String, Document>, ReplicaError>;

    /// Stop background work and release resources. Further calls are no-ops.
    async fn finalize(&self) -> Result<(), ReplicaError>;
}

/// Build a store for `config.mode` on top of an existing gateway.
pub async fn open_store(
    config: &ReplicaConfig,
    gateway: Arc<dyn RemoteGateway>,
) -> Result<Arc<dyn ObjectStore>, ReplicaError> {
    match config.mode {
        Mode::Local => Ok(Arc::new(LocalFirstStore::open(config, gateway).await?)),
        Mode::RemoteOnly => Ok(Arc::new(RemoteOnlyStore::new(gateway, config.granularity))),
    }
}

/// Connect to the remote store named in `config` and build a store.
pub async fn connect(config: &ReplicaConfig) -> Result<Arc<dyn ObjectStore>, ReplicaError> {
    let gateway = WsGateway::connect(config.remote_url.clone(), config.listen_url.clone())
        .await
        .map_err(|e| ReplicaError::Bootstrap(e.to_string()))?;
    open_store(config, Arc::new(gateway)).await
}

/// Decode `(id, snapshot)` pairs returned by a gateway.
pub(crate) fn load_all(
    documents: Vec<(String, Vec<u8>)>,
) -> Result<HashMap<String, Document>, ReplicaError> {
    let mut out = HashMap::with_capacity(documents.len());
    for (id, snapshot) in documents {
        out.insert(id, Document::load(&snapshot)?);
    }
    Ok(out)
}
