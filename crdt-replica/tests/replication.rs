//! In-process replication tests.
//!
//! Several local-first replicas share one `Authority` through
//! `MemoryGateway`, exercising bootstrap, propagation, notifications and
//! shutdown without sockets.

use async_trait::async_trait;
use crdt_replica::gateway::{GatewayError, RemoteGateway, Subscription};
use crdt_replica::{
    Authority, Counter, Document, Granularity, List, LocalFirstStore, Map, MemoryGateway,
    ObjectStore, Register, ReplicaConfig, ReplicaError, Set, StoreManager,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

/// Poll a condition until it holds or two seconds pass.
macro_rules! eventually {
    ($cond:expr) => {
        timeout(Duration::from_secs(2), async {
            while !$cond {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached within timeout")
    };
}

fn authority(granularity: Granularity) -> Arc<Authority> {
    Arc::new(Authority::new(granularity, 1024))
}

async fn replica(
    dir: &TempDir,
    authority: &Arc<Authority>,
    granularity: Granularity,
) -> Arc<LocalFirstStore> {
    let mut config = ReplicaConfig::for_testing(dir.path());
    config.granularity = granularity;
    let gateway = Arc::new(MemoryGateway::new(authority.clone()));
    Arc::new(LocalFirstStore::open(&config, gateway).await.unwrap())
}

#[tokio::test]
async fn test_counter_increment_reaches_other_replica() {
    let dir = tempfile::tempdir().unwrap();
    let authority = authority(Granularity::Operation);
    let a = replica(&dir, &authority, Granularity::Operation).await;
    let b = replica(&dir, &authority, Granularity::Operation).await;

    let counter_a = Counter::new(a.clone());
    let counter_b = Counter::new(b.clone());
    let ids = vec!["c-1".to_string()];

    counter_a.inc("c-1", 5).await.unwrap();

    // Visible locally through the cache-backed bulk path right away
    assert_eq!(counter_a.get_multiple(&ids).await.unwrap()["c-1"], 5);
    assert_eq!(counter_a.get("c-1").await.unwrap(), 5);

    eventually!(counter_b.get_multiple(&ids).await.unwrap().get("c-1") == Some(&5));

    // Remote merges are not written through to B's local store
    assert!(matches!(counter_b.get("c-1").await, Err(ReplicaError::NotFound(_))));

    // B's own write lands on top of the merged cache entry
    counter_b.inc("c-1", 3).await.unwrap();
    assert_eq!(counter_b.get_multiple(&ids).await.unwrap()["c-1"], 8);
    eventually!(counter_a.get_multiple(&ids).await.unwrap().get("c-1") == Some(&8));

    a.finalize().await.unwrap();
    b.finalize().await.unwrap();
}

#[tokio::test]
async fn test_state_granularity_converges() {
    let dir = tempfile::tempdir().unwrap();
    let authority = authority(Granularity::State);
    let a = replica(&dir, &authority, Granularity::State).await;
    let b = replica(&dir, &authority, Granularity::State).await;

    let map_a = Map::new(a.clone());
    let map_b = Map::new(b.clone());
    map_a.put("m-1", "from", "a").await.unwrap();
    map_a.put("m-1", "second", "a").await.unwrap();

    let ids = vec!["m-1".to_string()];
    eventually!(map_b
        .get_multiple(&ids)
        .await
        .unwrap()
        .get("m-1")
        .is_some_and(|entries| entries.len() == 2));

    a.finalize().await.unwrap();
    b.finalize().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_sees_populated_data() {
    let dir = tempfile::tempdir().unwrap();
    let authority = authority(Granularity::Operation);
    let gateway = MemoryGateway::new(authority.clone());

    Counter::populate(&gateway, 3).await.unwrap();
    Register::populate(&gateway, 2, 8).await.unwrap();
    Set::populate(&gateway, 2, 4).await.unwrap();
    Map::populate(&gateway, 2, 5, 6).await.unwrap();
    List::populate(&gateway, 2, 10, 4).await.unwrap();
    assert_eq!(authority.len().await, 11);

    let store = replica(&dir, &authority, Granularity::Operation).await;
    assert_eq!(store.stats().await.cached_documents, 11);

    let counters = Counter::new(store.clone()).get_all().await.unwrap();
    assert_eq!(counters.len(), 3);
    assert!(counters.values().all(|v| *v == 0));

    let registers = Register::new(store.clone()).get_all().await.unwrap();
    assert!(registers.values().all(|v| v.as_ref().is_some_and(|s| s.len() == 8)));

    let sets = Set::new(store.clone());
    assert_eq!(sets.get("s-0").await.unwrap(), vec!["0", "1", "2", "3"]);
    assert!(sets.contains("s-1", "3").await.unwrap());

    let maps = Map::new(store.clone());
    assert_eq!(maps.get("m-1").await.unwrap().len(), 5);
    assert_eq!(maps.value("m-0", "4").await.unwrap().map(|v| v.len()), Some(6));

    let lists = List::new(store.clone());
    assert_eq!(lists.get("l-0").await.unwrap().len(), 10);
    assert_eq!(lists.get_at("l-1", 9).await.unwrap().len(), 4);

    store.finalize().await.unwrap();
}

#[tokio::test]
async fn test_type_operations_on_local_store() {
    let dir = tempfile::tempdir().unwrap();
    let authority = authority(Granularity::Operation);
    let store = replica(&dir, &authority, Granularity::Operation).await;

    let register = Register::new(store.clone());
    register.set("r-1", "one").await.unwrap();
    register.set("r-1", "two").await.unwrap();
    assert_eq!(register.get("r-1").await.unwrap().as_deref(), Some("two"));

    let set = Set::new(store.clone());
    set.add("s-1", "a").await.unwrap();
    set.add("s-1", "b").await.unwrap();
    set.rmv("s-1", "a").await.unwrap();
    assert_eq!(set.get("s-1").await.unwrap(), vec!["b"]);
    set.clear("s-1").await.unwrap();
    assert!(set.get("s-1").await.unwrap().is_empty());

    let map = Map::new(store.clone());
    map.put("m-1", "k", "v").await.unwrap();
    assert!(map.contains("m-1", "k").await.unwrap());
    map.rmv("m-1", "k").await.unwrap();
    assert!(!map.contains("m-1", "k").await.unwrap());
    assert_eq!(map.value("m-1", "k").await.unwrap(), None);

    let list = List::new(store.clone());
    list.append("l-1", "b").await.unwrap();
    list.prepend("l-1", "a").await.unwrap();
    list.add("l-1", 2, "c").await.unwrap();
    assert_eq!(list.get("l-1").await.unwrap(), vec!["a", "b", "c"]);
    list.rmv("l-1", 1).await.unwrap();
    assert_eq!(list.get("l-1").await.unwrap(), vec!["a", "c"]);
    assert!(matches!(list.rmv("l-1", 5).await, Err(ReplicaError::InvalidValue(_))));
    assert!(matches!(list.get_at("l-1", 2).await, Err(ReplicaError::InvalidValue(_))));
    list.clear("l-1").await.unwrap();
    assert!(list.get("l-1").await.unwrap().is_empty());

    let counter = Counter::new(store.clone());
    counter.inc("c-1", 10).await.unwrap();
    counter.dec("c-1", 4).await.unwrap();
    assert_eq!(counter.get("c-1").await.unwrap(), 6);

    // Every write reaches the remote store
    eventually!(authority.len().await == 5);
    eventually!(authority.get("c-1").await.is_some_and(|snapshot| {
        let remote = Document::load(&snapshot).unwrap();
        crdt_replica::types::counter::value(&remote) == 6
    }));

    store.finalize().await.unwrap();
}

#[tokio::test]
async fn test_own_notifications_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let authority = authority(Granularity::Operation);
    let store = replica(&dir, &authority, Granularity::Operation).await;

    Register::new(store.clone()).set("r-1", "mine").await.unwrap();
    let ids = vec!["r-1".to_string()];
    let before = store.get_multiple(&ids).await.unwrap()["r-1"].save();

    eventually!(store.stats().await.notifications_skipped == 1);

    let after = store.get_multiple(&ids).await.unwrap()["r-1"].save();
    assert_eq!(before, after);
    assert_eq!(store.stats().await.notifications_applied, 0);

    store.finalize().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_notification_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let authority = authority(Granularity::State);
    let store = replica(&dir, &authority, Granularity::State).await;

    let doc = Document::new();
    crdt_replica::types::set::insert(&doc, "x");
    authority.upsert("s-1", &doc.save(), "elsewhere").await.unwrap();
    eventually!(store.stats().await.notifications_applied == 1);
    let ids = vec!["s-1".to_string()];
    let once = store.get_multiple(&ids).await.unwrap()["s-1"].save();

    // Same payload again
    authority.upsert("s-1", &doc.save(), "elsewhere").await.unwrap();
    eventually!(store.stats().await.notifications_applied == 2);
    let twice = store.get_multiple(&ids).await.unwrap()["s-1"].save();
    assert_eq!(once, twice);

    store.finalize().await.unwrap();
}

/// Gateway whose upserts never complete.
struct StallingGateway {
    upserts_started: AtomicUsize,
    _feed: mpsc::Sender<crdt_replica::Notification>,
    feed_rx: tokio::sync::Mutex<Option<mpsc::Receiver<crdt_replica::Notification>>>,
}

impl StallingGateway {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(16);
        Self {
            upserts_started: AtomicUsize::new(0),
            _feed: tx,
            feed_rx: tokio::sync::Mutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl RemoteGateway for StallingGateway {
    async fn get(&self, _: &str) -> Result<Option<Vec<u8>>, GatewayError> {
        Ok(None)
    }
    async fn upsert(&self, _: &str, _: &[u8], _: &str) -> Result<(), GatewayError> {
        self.upserts_started.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
    async fn get_by_prefix(&self, _: &str) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        Ok(Vec::new())
    }
    async fn get_many(&self, _: &[String]) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        Ok(Vec::new())
    }
    async fn get_all(&self) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        Ok(Vec::new())
    }
    async fn subscribe(&self, _: usize) -> Result<Subscription, GatewayError> {
        let rx = self.feed_rx.lock().await.take().ok_or(GatewayError::Closed)?;
        Ok(Subscription::new(rx, None))
    }
}

async fn stalled_replica(dir: &TempDir, queue_capacity: usize) -> (Arc<StallingGateway>, Arc<LocalFirstStore>) {
    let gateway = Arc::new(StallingGateway::new());
    let mut config = ReplicaConfig::for_testing(dir.path());
    config.queue_capacity = queue_capacity;
    let store = LocalFirstStore::open(&config, gateway.clone()).await.unwrap();
    (gateway, Arc::new(store))
}

#[tokio::test]
async fn test_finalize_drops_queued_changes() {
    let dir = tempfile::tempdir().unwrap();
    let (gateway, store) = stalled_replica(&dir, 16).await;
    let counter = Counter::new(store.clone());

    for i in 0..4 {
        counter.inc(&format!("c-{i}"), 1).await.unwrap();
    }
    // One change is stuck in flight, three wait in the queue
    eventually!(store.stats().await.queue_depth == 3);
    eventually!(gateway.upserts_started.load(Ordering::SeqCst) == 1);

    timeout(Duration::from_secs(1), store.finalize())
        .await
        .expect("finalize must not wait for the remote")
        .unwrap();

    let stats = store.stats().await;
    assert_eq!(stats.changes_dropped, 3);
    assert_eq!(stats.changes_propagated, 0);
    assert_eq!(gateway.upserts_started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_full_queue_delays_writer() {
    let dir = tempfile::tempdir().unwrap();
    let (_gateway, store) = stalled_replica(&dir, 2).await;
    let set = Set::new(store.clone());

    set.add("s-1", "a").await.unwrap();
    eventually!(store.stats().await.queue_depth == 0);
    set.add("s-2", "b").await.unwrap();
    set.add("s-3", "c").await.unwrap();

    // Queue is full: the next write is durable locally but waits to enqueue
    let blocked = timeout(Duration::from_millis(100), set.add("s-4", "d")).await;
    assert!(blocked.is_err());
    assert_eq!(store.stats().await.changes_enqueued, 3);

    timeout(Duration::from_secs(1), store.finalize()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_manager_finalizes_replicas() {
    let dir = tempfile::tempdir().unwrap();
    let authority = authority(Granularity::Operation);
    let manager = StoreManager::new();

    for _ in 0..3 {
        let store: Arc<dyn ObjectStore> = replica(&dir, &authority, Granularity::Operation).await;
        manager.register(store).await;
    }
    assert_eq!(manager.len().await, 3);

    timeout(Duration::from_secs(2), manager.finalize_all())
        .await
        .unwrap()
        .unwrap();
    assert!(manager.is_empty().await);
}
