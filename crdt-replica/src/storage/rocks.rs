//! RocksDB-backed durable local store.
//!
//! One column family, `documents`, maps object id → LZ4-compressed document
//! snapshot. The store is written in two ways:
//!
//! - `put_batch`: bootstrap copy of the remote store, one atomic batch, no fsync
//! - `put`: local writes, fsync'd according to `sync_writes`
//!
//! After `close()` every call fails with `StoreError::Closed`; the RocksDB
//! handle itself is released when the store is dropped.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Column family holding document snapshots.
const CF_DOCUMENTS: &str = "documents";

/// Local store tuning.
#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every local write (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            block_cache_size: 64 * 1024 * 1024, // 64MB
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 32 * 1024 * 1024, // 32MB
        }
    }
}

impl LocalStoreConfig {
    /// Config for testing (small caches, no fsync).
    pub fn for_testing() -> Self {
        Self {
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// No document stored under this id
    NotFound(String),
    /// Compression error
    CompressionError(String),
    /// Store was closed by `close()`
    Closed,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(id) => write!(f, "Document not found: {id}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::Closed => write!(f, "Local store is closed"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// Crash-safe id → document table.
pub struct LocalStore {
    /// RocksDB instance (single-threaded mode, concurrent callers share &self)
    db: DBWithThreadMode<SingleThreaded>,
    config: LocalStoreConfig,
    path: PathBuf,
    closed: AtomicBool,
}

impl LocalStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>, config: LocalStoreConfig) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let mut cf_opts = Options::default();
        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        cf_opts.set_block_based_table_factory(&block_opts);
        // Values are already LZ4 compressed
        cf_opts.set_compression_type(DBCompressionType::None);
        cf_opts.set_write_buffer_size(config.write_buffer_size);
        cf_opts.optimize_for_point_lookup(config.block_cache_size as u64);

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &path,
            vec![ColumnFamilyDescriptor::new(CF_DOCUMENTS, cf_opts)],
        )?;

        Ok(Self {
            db,
            config,
            path,
            closed: AtomicBool::new(false),
        })
    }

    /// Load a document snapshot by id.
    pub fn get(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        self.ensure_open()?;
        let cf = self.cf()?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map_err(|e| StoreError::CompressionError(e.to_string())),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    /// Insert or replace a document snapshot.
    pub fn put(&self, id: &str, snapshot: &[u8]) -> Result<(), StoreError> {
        self.ensure_open()?;
        let cf = self.cf()?;
        let compressed = lz4_flex::compress_prepend_size(snapshot);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.put_cf_opt(cf, id.as_bytes(), &compressed, &write_opts)?;
        Ok(())
    }

    /// Write many snapshots in one atomic batch without fsync.
    ///
    /// Used once at bootstrap; returns the number of documents written.
    pub fn put_batch<'a, I>(&self, documents: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        self.ensure_open()?;
        let cf = self.cf()?;

        let mut batch = WriteBatch::default();
        let mut count = 0;
        for (id, snapshot) in documents {
            batch.put_cf(cf, id.as_bytes(), lz4_flex::compress_prepend_size(snapshot));
            count += 1;
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(false);
        self.db.write_opt(batch, &write_opts)?;
        Ok(count)
    }

    /// Check if a document exists.
    pub fn contains(&self, id: &str) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let cf = self.cf()?;
        Ok(self.db.get_cf(cf, id.as_bytes())?.is_some())
    }

    /// Number of stored documents (full scan).
    pub fn len(&self) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let cf = self.cf()?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.db.flush()?;
        Ok(())
    }

    /// Flush and refuse all further calls.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.db.flush()?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_DOCUMENTS)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{CF_DOCUMENTS}' not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp() -> (tempfile::TempDir, LocalStore) {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("db"), LocalStoreConfig::for_testing()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_creates_directory() {
        let (_dir, store) = open_temp();
        assert!(store.path().exists());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_put_get() {
        let (_dir, store) = open_temp();
        store.put("c-1", b"counter snapshot").unwrap();
        assert_eq!(store.get("c-1").unwrap(), b"counter snapshot");
        assert!(store.contains("c-1").unwrap());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, store) = open_temp();
        match store.get("r-404") {
            Err(StoreError::NotFound(id)) => assert_eq!(id, "r-404"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_put_overwrites() {
        let (_dir, store) = open_temp();
        store.put("m-1", b"v1").unwrap();
        store.put("m-1", b"v2").unwrap();
        assert_eq!(store.get("m-1").unwrap(), b"v2");
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_put_batch() {
        let (_dir, store) = open_temp();
        let docs: Vec<(String, Vec<u8>)> = (0..100)
            .map(|i| (format!("s-{i}"), format!("set {i}").into_bytes()))
            .collect();

        let written = store
            .put_batch(docs.iter().map(|(id, b)| (id.as_str(), b.as_slice())))
            .unwrap();
        assert_eq!(written, 100);
        assert_eq!(store.len().unwrap(), 100);
        assert_eq!(store.get("s-42").unwrap(), b"set 42");
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = LocalStore::open(&path, LocalStoreConfig::for_testing()).unwrap();
            store.put("l-1", b"list").unwrap();
            store.close().unwrap();
        }
        let store = LocalStore::open(&path, LocalStoreConfig::for_testing()).unwrap();
        assert_eq!(store.get("l-1").unwrap(), b"list");
    }

    #[test]
    fn test_closed_store_rejects_calls() {
        let (_dir, store) = open_temp();
        store.put("c-1", b"x").unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.get("c-1"), Err(StoreError::Closed)));
        assert!(matches!(store.put("c-1", b"y"), Err(StoreError::Closed)));
        // Closing twice is harmless
        store.close().unwrap();
    }

    #[test]
    fn test_large_snapshot_roundtrip() {
        let (_dir, store) = open_temp();
        let data = vec![7u8; 1_000_000];
        store.put("l-big", &data).unwrap();
        assert_eq!(store.get("l-big").unwrap(), data);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotFound("c-1".into());
        assert!(err.to_string().contains("not found"));
        assert!(StoreError::Closed.to_string().contains("closed"));
    }
}
