//! Local-first store: reads and writes are served locally, replication
//! happens in the background.
//!
//! ```text
//!              apply_change(id, doc)
//!                     │
//!        ┌────────────▼─────────────┐    put (sync)    ┌──────────────┐
//!        │ DocumentCache (Mutex)    │ ───────────────► │ LocalStore   │
//!        └────▲───────────┬─────────┘                  └──────────────┘
//!             │           │ latest change
//!    merge    │           ▼
//!  ┌──────────┴───┐   PropagationQueue ──► worker ──► gateway.upsert(origin)
//!  │ listener     │                                         │
//!  └──────▲───────┘                                         ▼
//!         └────────────── Subscription ◄────────── remote notifications
//! ```
//!
//! Bootstrap copies the whole remote store into the cache and the local
//! store. Point reads (`get`) are served by the local store, bulk reads by
//! the cache, so a document merged from a notification is visible to bulk
//! reads before it reaches disk.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::ObjectStore;
use crate::cache::DocumentCache;
use crate::config::{Granularity, Mode, ReplicaConfig};
use crate::document::Document;
use crate::error::ReplicaError;
use crate::gateway::{RemoteGateway, Subscription};
use crate::listener::spawn_listener;
use crate::propagation::{Change, PropagationQueue, spawn_worker};
use crate::stats::{ReplicaCounters, ReplicaStats};
use crate::storage::LocalStore;

/// Background tasks and the signal that stops them.
struct Tasks {
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<usize>,
    listener: JoinHandle<Subscription>,
}

pub struct LocalFirstStore {
    origin: String,
    granularity: Granularity,
    cache: Arc<DocumentCache>,
    local: LocalStore,
    queue: PropagationQueue,
    counters: Arc<ReplicaCounters>,
    tasks: Mutex<Option<Tasks>>,
    local_path: PathBuf,
}

impl LocalFirstStore {
    /// Bootstrap a replica from the remote store and start replication.
    ///
    /// Any failure here is a [`ReplicaError::Bootstrap`].
    pub async fn open(
        config: &ReplicaConfig,
        gateway: Arc<dyn RemoteGateway>,
    ) -> Result<Self, ReplicaError> {
        config
            .validate()
            .map_err(|e| ReplicaError::Bootstrap(e.to_string()))?;

        let origin = Uuid::new_v4().to_string();
        let local_path = config.data_dir.join(&origin);

        let local = LocalStore::open(&local_path, config.local_store.clone()).map_err(|e| {
            ReplicaError::Bootstrap(format!("opening local store at {}: {e}", local_path.display()))
        })?;

        // Subscribe first so nothing committed during the bulk read is missed
        let subscription = gateway
            .subscribe(config.subscription_capacity)
            .await
            .map_err(|e| ReplicaError::Bootstrap(format!("subscribing to notifications: {e}")))?;

        let documents = gateway
            .get_all()
            .await
            .map_err(|e| ReplicaError::Bootstrap(format!("reading remote documents: {e}")))?;

        let cache = Arc::new(DocumentCache::new());
        for (id, snapshot) in &documents {
            let document = Document::load(snapshot)
                .map_err(|e| ReplicaError::Bootstrap(format!("decoding {id}: {e}")))?;
            cache.insert(id.clone(), document).await;
        }
        let written = local
            .put_batch(documents.iter().map(|(id, snapshot)| (id.as_str(), snapshot.as_slice())))
            .map_err(|e| ReplicaError::Bootstrap(format!("writing local store: {e}")))?;
        // The batch skips fsync
        local
            .flush()
            .map_err(|e| ReplicaError::Bootstrap(format!("flushing local store: {e}")))?;

        let counters = Arc::new(ReplicaCounters::default());
        let (queue, rx) = PropagationQueue::new(config.queue_capacity, counters.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = spawn_worker(
            rx,
            gateway,
            origin.clone(),
            shutdown_rx.clone(),
            counters.clone(),
        );
        let listener = spawn_listener(
            subscription,
            cache.clone(),
            origin.clone(),
            config.granularity,
            shutdown_rx,
            counters.clone(),
        );

        log::info!(
            "Replica {origin} bootstrapped {written} documents (granularity: {})",
            config.granularity
        );

        Ok(Self {
            origin,
            granularity: config.granularity,
            cache,
            local,
            queue,
            counters,
            tasks: Mutex::new(Some(Tasks {
                shutdown,
                worker,
                listener,
            })),
            local_path,
        })
    }

    pub async fn stats(&self) -> ReplicaStats {
        self.counters
            .snapshot(self.cache.len().await, self.queue.pending())
    }

    /// Directory of this instance's local store.
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Whether `finalize` has run.
    pub async fn is_finalized(&self) -> bool {
        self.tasks.lock().await.is_none()
    }
}

#[async_trait]
impl ObjectStore for LocalFirstStore {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn mode(&self) -> Mode {
        Mode::Local
    }

    fn granularity(&self) -> Granularity {
        self.granularity
    }

    async fn get(&self, id: &str) -> Result<Document, ReplicaError> {
        let snapshot = self
            .local
            .get(id)
            .map_err(|e| ReplicaError::from_local_read(id, e))?;
        Ok(Document::load(&snapshot)?)
    }

    async fn apply_change(&self, id: &str, document: &Document) -> Result<(), ReplicaError> {
        self.cache.commit_local(id, document, &self.local).await?;

        let bytes = match self.granularity {
            Granularity::Operation => document.latest_change(),
            Granularity::State => document.latest_change().map(|_| document.save()),
        };
        if let Some(bytes) = bytes {
            self.queue
                .enqueue(Change {
                    id: id.to_string(),
                    bytes,
                })
                .await?;
        }
        Ok(())
    }

    async fn get_all_by_prefix(&self, prefix: &str) -> Result<HashMap<String, Document>, ReplicaError> {
        self.cache.get_by_prefix(prefix).await
    }

    async fn get_multiple(&self, ids: &[String]) -> Result<HashMap<String, Document>, ReplicaError> {
        self.cache.get_many(ids).await
    }

    async fn finalize(&self) -> Result<(), ReplicaError> {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return Ok(());
        };

        let _ = tasks.shutdown.send(true);

        let dropped = match tasks.worker.await {
            Ok(dropped) => dropped,
            Err(e) => {
                log::error!("Propagation worker of {} failed: {e}", self.origin);
                0
            }
        };
        match tasks.listener.await {
            Ok(mut subscription) => subscription.close(),
            Err(e) => log::error!("Notification listener of {} failed: {e}", self.origin),
        }

        self.local.close().map_err(ReplicaError::LocalClose)?;

        let stats = self.counters.snapshot(self.cache.len().await, 0);
        log::info!(
            "Replica {} finalized: {} propagated, {} failed, {} dropped, {} notifications applied",
            self.origin,
            stats.changes_propagated,
            stats.propagation_failures,
            dropped,
            stats.notifications_applied
        );
        Ok(())
    }
}
