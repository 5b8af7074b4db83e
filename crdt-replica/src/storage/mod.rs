//! Durable local storage for replicated documents.
//!
//! ```text
//! ┌──────────────────┐   local writes    ┌───────────────────────────┐
//! │  DocumentCache   │ ────────────────► │ LocalStore (RocksDB)      │
//! │  (in memory)     │                   │ CF "documents", LZ4 blobs │
//! └──────────────────┘ ◄── bootstrap ─── └───────────────────────────┘
//! ```

pub mod rocks;

pub use rocks::{LocalStore, LocalStoreConfig, StoreError};
