//! Ownership of open store handles.

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::ObjectStore;
use crate::error::ReplicaError;

/// Holds every store opened by a run and finalizes them together.
#[derive(Default)]
pub struct StoreManager {
    stores: Mutex<Vec<Arc<dyn ObjectStore>>>,
}

impl StoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a store handle; returns it for immediate use.
    pub async fn register(&self, store: Arc<dyn ObjectStore>) -> Arc<dyn ObjectStore> {
        self.stores.lock().await.push(store.clone());
        store
    }

    pub async fn len(&self) -> usize {
        self.stores.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Finalize every registered store concurrently and forget them.
    ///
    /// All stores are finalized even if some fail; the first error is returned.
    pub async fn finalize_all(&self) -> Result<(), ReplicaError> {
        let stores: Vec<_> = self.stores.lock().await.drain(..).collect();
        let count = stores.len();

        let results = join_all(stores.iter().map(|store| store.finalize())).await;

        let mut first_error = None;
        for (store, result) in stores.iter().zip(results) {
            if let Err(e) = result {
                log::error!("Finalizing store {} failed: {e}", store.origin());
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        log::info!("Finalized {count} stores");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
