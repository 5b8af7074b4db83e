//! # crdt-replica: local-first replicated CRDT object store
//!
//! Keeps CRDT documents in a local cache and a durable RocksDB store, and
//! replicates them asynchronously through an authoritative remote store.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐   upsert(id, change, origin)   ┌──────────────────┐
//! │ LocalFirstStore A │ ─────────────────────────────► │ AuthorityServer  │
//! │  cache + RocksDB  │ ◄───────────────────────────── │  Authority       │
//! └───────────────────┘   notification{kind, origin}   │  (documents)     │
//!                                                      └────────┬─────────┘
//! ┌───────────────────┐                                         │
//! │ LocalFirstStore B │ ◄───────── NotificationHub (fan-out) ───┘
//! └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`document`]: Yrs-backed document with load, save, merge and markers
//! - [`storage`]: Durable local store (RocksDB + LZ4)
//! - [`cache`], [`propagation`], [`listener`]: local-first replication machinery
//! - [`store`]: `ObjectStore` facade, local-first and remote-only variants
//! - [`types`]: counter, register, set, map and list on top of a store
//! - [`gateway`]: remote store access (WebSocket or in-process)
//! - [`authority`], [`broadcast`], [`server`], [`protocol`]: the remote side

pub mod authority;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod gateway;
pub mod listener;
pub mod propagation;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use authority::Authority;
pub use broadcast::{HubStats, NotificationHub};
pub use config::{ConfigError, Granularity, Mode, ReplicaConfig};
pub use document::{Document, DocumentError, Marker};
pub use error::ReplicaError;
pub use gateway::{GatewayError, MemoryGateway, RemoteGateway, Subscription, WsGateway};
pub use protocol::{Frame, Notification, NotificationKind, ProtocolError};
pub use server::{AuthorityServer, ServerConfig, ServerStats};
pub use stats::ReplicaStats;
pub use storage::{LocalStore, LocalStoreConfig, StoreError};
pub use store::{
    LocalFirstStore, ObjectStore, RemoteOnlyStore, StoreManager, connect, open_store,
};
pub use types::{Counter, List, Map, Register, Set};
