//! # localdb-store
//!
//! A small local key-value store with an async API.
//!
//! A store is a named, versioned SQLite file holding named collections of
//! keyed JSON records. Every operation is an `async fn` resolving to a
//! [`StoreResult`], so callers always learn whether a write landed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  KeyValueStore (lifecycle, collections)  │
//! │  Collection    (put / get / delete ...)  │
//! │  LocalSession  (namespaced key/value)    │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL, FIFO admission) │
//! │  Migrations (versioned, transactional)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use localdb_store::{CollectionOptions, KeyValueStore, StoreConfig};
//!
//! let store = KeyValueStore::open_with("books", 1, StoreConfig::default()).await?;
//! let key = store.put(&serde_json::json!({"title": "Dune"}), None).await?;
//! let book: Option<serde_json::Value> = store.get(key).await?;
//!
//! store.create_collection("rooms", CollectionOptions::key_path("id")).await?;
//! store.collection("rooms").put(&room, None).await?;
//! store.close().await?;
//! ```

pub mod collection;
pub mod config;
pub mod db;
pub mod error;
pub mod key;
pub mod local;
pub mod migration;
pub mod store;

// ── re-exports ───────────────────────────────────────────────────────

pub use collection::{CollectionInfo, CollectionOptions};
pub use config::{DEFAULT_COLLECTION, StoreConfig};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use key::Key;
pub use local::LocalSession;
pub use store::{Collection, KeyValueStore, StoreState};
