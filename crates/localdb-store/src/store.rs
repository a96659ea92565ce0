//! The key-value store facade.
//!
//! A [`KeyValueStore`] is a handle on one named, versioned local database.
//! It moves through a small lifecycle:
//!
//! ```text
//! Unopened ──open()──▶ Opening ──▶ Ready ──close()──▶ Closed
//!                          │
//!                          └──────▶ Failed
//! ```
//!
//! Only a `Ready` store accepts data operations; every other state answers
//! with [`StoreError::NotOpen`]. `Failed` and `Closed` are terminal.
//!
//! Records live in collections. Every opened store has a default collection
//! (auto-increment, no key path) which the store-level `put`/`get`/`delete`
//! target; other collections are reached through [`KeyValueStore::collection`].

use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::collection::{self, CollectionInfo, CollectionOptions};
use crate::config::StoreConfig;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use crate::local::LocalSession;

/// `store_meta` key holding the caller's schema version.
const META_USER_VERSION: &str = "user_version";
/// `store_meta` key holding the store name the file was created for.
const META_NAME: &str = "name";

// ═══════════════════════════════════════════════════════════════════════
//  Lifecycle
// ═══════════════════════════════════════════════════════════════════════

/// Observable lifecycle state of a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreState {
    Unopened,
    Opening,
    Ready,
    Failed,
    Closed,
}

impl StoreState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Unopened => "unopened",
            Self::Opening => "opening",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Lifecycle {
    Unopened,
    Opening,
    Ready {
        db: Database,
        version: u32,
        /// Cloned into every admitted operation; `close` waits until all
        /// clones are gone.
        admissions: mpsc::Sender<()>,
        drained: mpsc::Receiver<()>,
    },
    Failed,
    Closed,
}

impl Lifecycle {
    fn state(&self) -> StoreState {
        match self {
            Self::Unopened => StoreState::Unopened,
            Self::Opening => StoreState::Opening,
            Self::Ready { .. } => StoreState::Ready,
            Self::Failed => StoreState::Failed,
            Self::Closed => StoreState::Closed,
        }
    }
}

struct Inner {
    name: String,
    config: StoreConfig,
    lifecycle: Mutex<Lifecycle>,
}

// ═══════════════════════════════════════════════════════════════════════
//  KeyValueStore
// ═══════════════════════════════════════════════════════════════════════

/// Handle on a named, versioned local store.
///
/// Cheap to clone; clones share the same lifecycle, so closing one clone
/// closes them all.
#[derive(Clone)]
pub struct KeyValueStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl KeyValueStore {
    /// Create an unopened handle for the store called `name`.
    ///
    /// The name doubles as the database file stem, so it may only contain
    /// ASCII letters, digits, `-`, `_` and `.`.
    pub fn new(name: impl Into<String>, config: StoreConfig) -> StoreResult<Self> {
        let name = name.into();
        validate_store_name(&name)?;
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                config,
                lifecycle: Mutex::new(Lifecycle::Unopened),
            }),
        })
    }

    /// Create a handle and open it at `version` in one step.
    pub async fn open_with(
        name: impl Into<String>,
        version: u32,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let store = Self::new(name, config)?;
        store.open(version).await?;
        Ok(store)
    }

    /// Open (creating if needed) the underlying database at schema
    /// `version`.
    ///
    /// On success the store is `Ready` and its default collection exists.
    /// On any failure the store becomes `Failed` for good and the error is
    /// returned. `version` must be at least 1 and not lower than the
    /// version already recorded in the store; a higher version is recorded
    /// as the new one.
    #[instrument(skip(self), fields(store = %self.inner.name))]
    pub async fn open(&self, version: u32) -> StoreResult<()> {
        {
            let mut lifecycle = self.lifecycle()?;
            if !matches!(*lifecycle, Lifecycle::Unopened) {
                return Err(StoreError::InvalidState {
                    name: self.inner.name.clone(),
                    state: lifecycle.state(),
                });
            }
            *lifecycle = Lifecycle::Opening;
        }

        let outcome = self.open_database(version).await;
        let mut lifecycle = self.lifecycle()?;
        match outcome {
            Ok(db) => {
                let (admissions, drained) = mpsc::channel(1);
                *lifecycle = Lifecycle::Ready {
                    db,
                    version,
                    admissions,
                    drained,
                };
                info!(version, "store ready");
                Ok(())
            }
            Err(err) => {
                *lifecycle = Lifecycle::Failed;
                error!(%err, "failed to open store");
                Err(err)
            }
        }
    }

    async fn open_database(&self, version: u32) -> StoreResult<Database> {
        if version == 0 {
            return Err(StoreError::InvalidArgument(
                "store version must be at least 1".to_string(),
            ));
        }

        let config = self.inner.config.clone();
        let name = self.inner.name.clone();
        let open_failed = |reason: String| StoreError::OpenFailed {
            name: name.clone(),
            reason,
        };

        let db = if config.in_memory {
            Database::open_in_memory(config.busy_timeout_ms)
                .map_err(|e| open_failed(e.to_string()))?
        } else {
            let path = config.store_path(&name);
            let busy_timeout_ms = config.busy_timeout_ms;
            tokio::task::spawn_blocking(move || {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)
                        .map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
                }
                Database::open(&path, busy_timeout_ms).map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| open_failed(e.to_string()))?
            .map_err(open_failed)?
        };

        db.run_migrations()
            .await
            .map_err(|e| open_failed(e.to_string()))?;

        let default_collection = config.default_collection.clone();
        let store_name = name.clone();
        db.transaction(move |tx| {
            match read_meta(tx, META_USER_VERSION)? {
                Some(stored) => {
                    let stored: u32 = stored.parse().map_err(|_| {
                        StoreError::InvalidArgument(format!("corrupt stored version `{stored}`"))
                    })?;
                    if version < stored {
                        return Err(StoreError::VersionMismatch {
                            requested: version,
                            stored,
                        });
                    }
                    if version > stored {
                        info!(from = stored, to = version, "upgrading store version");
                        write_meta(tx, META_USER_VERSION, &version.to_string())?;
                    }
                }
                None => {
                    debug!(version, "initialising new store");
                    write_meta(tx, META_USER_VERSION, &version.to_string())?;
                    write_meta(tx, META_NAME, &store_name)?;
                }
            }

            if !collection::exists(tx, &default_collection)? {
                collection::create(tx, &default_collection, &CollectionOptions::auto_increment())?;
                debug!(collection = %default_collection, "default collection created");
            }
            Ok(())
        })
        .await
        .map_err(|e| match e {
            e @ (StoreError::VersionMismatch { .. } | StoreError::InvalidArgument(_)) => e,
            other => open_failed(other.to_string()),
        })?;

        Ok(db)
    }

    /// Close the store.
    ///
    /// New operations fail with `NotOpen` immediately; the returned future
    /// resolves once every operation admitted before the call has finished.
    #[instrument(skip(self), fields(store = %self.inner.name))]
    pub async fn close(&self) -> StoreResult<()> {
        let (db, mut drained) = {
            let mut lifecycle = self.lifecycle()?;
            match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
                // Dropping `admissions` leaves only the clones held by
                // operations that passed the state check.
                Lifecycle::Ready { db, drained, .. } => (db, drained),
                previous => {
                    let state = previous.state();
                    *lifecycle = previous;
                    return Err(StoreError::NotOpen {
                        name: self.inner.name.clone(),
                        state,
                    });
                }
            }
        };

        // Resolves with `None` once the last admitted operation has
        // finished or been dropped.
        let _ = drained.recv().await;
        // An operation dropped mid-call may still be running on the
        // blocking pool; queue behind it.
        db.execute(|_| Ok(())).await?;
        drop(db);
        info!("store closed");
        Ok(())
    }

    // ── introspection ────────────────────────────────────────────────

    /// The store name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        self.lifecycle()
            .map(|lifecycle| lifecycle.state())
            .unwrap_or(StoreState::Failed)
    }

    /// Schema version the store was opened at, while it is `Ready`.
    pub fn version(&self) -> Option<u32> {
        match &*self.lifecycle().ok()? {
            Lifecycle::Ready { version, .. } => Some(*version),
            _ => None,
        }
    }

    /// On-disk location, or `None` for in-memory stores.
    pub fn path(&self) -> Option<PathBuf> {
        (!self.inner.config.in_memory).then(|| self.inner.config.store_path(&self.inner.name))
    }

    /// Name of the collection the store-level record operations target.
    pub fn default_collection_name(&self) -> &str {
        &self.inner.config.default_collection
    }

    // ── collections ──────────────────────────────────────────────────

    /// Create a collection.
    #[instrument(skip(self), fields(store = %self.inner.name))]
    pub async fn create_collection(&self, name: &str, options: CollectionOptions) -> StoreResult<()> {
        let db = self.database()?;
        let name = name.to_string();
        db.transaction(move |tx| collection::create(tx, &name, &options))
            .await
            .inspect_err(|err| warn!(%err, "create collection failed"))
    }

    /// Delete a collection together with all of its records.
    ///
    /// The default collection cannot be deleted.
    #[instrument(skip(self), fields(store = %self.inner.name))]
    pub async fn delete_collection(&self, name: &str) -> StoreResult<()> {
        let db = self.database()?;
        if name == self.default_collection_name() {
            let err = StoreError::InvalidArgument(format!(
                "the default collection `{name}` cannot be deleted"
            ));
            warn!(%err, "delete collection failed");
            return Err(err);
        }
        let name = name.to_string();
        db.transaction(move |tx| collection::remove(tx, &name))
            .await
            .inspect_err(|err| warn!(%err, "delete collection failed"))
    }

    /// Metadata of every collection, ordered by name.
    pub async fn collections(&self) -> StoreResult<Vec<CollectionInfo>> {
        let db = self.database()?;
        db.execute(collection::list)
            .await
            .inspect_err(|err| warn!(%err, "list collections failed"))
    }

    /// Metadata of one collection.
    pub async fn collection_info(&self, name: &str) -> StoreResult<CollectionInfo> {
        let db = self.database()?;
        let name = name.to_string();
        db.execute(move |conn| collection::info(conn, &name))
            .await
            .inspect_err(|err| warn!(%err, "collection info failed"))
    }

    /// A handle on the collection called `name`. Whether it exists is
    /// checked by each operation.
    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection {
            store: self.clone(),
            name: name.into(),
        }
    }

    fn default_collection(&self) -> Collection {
        self.collection(self.default_collection_name())
    }

    // ── default collection records ───────────────────────────────────

    /// Insert or overwrite a record in the default collection.
    ///
    /// Without `key` the default collection generates one. Resolves with
    /// the key the record was stored under once the write committed.
    pub async fn put<T>(&self, record: &T, key: Option<Key>) -> StoreResult<Key>
    where
        T: Serialize + ?Sized,
    {
        self.default_collection().put(record, key).await
    }

    /// Fetch a record from the default collection.
    pub async fn get<T: DeserializeOwned>(&self, key: impl Into<Key>) -> StoreResult<Option<T>> {
        self.default_collection().get(key).await
    }

    /// Delete a record from the default collection. Resolves with whether
    /// it existed.
    pub async fn delete(&self, key: impl Into<Key>) -> StoreResult<bool> {
        self.default_collection().delete(key).await
    }

    /// Every record of the default collection in key order.
    pub async fn get_all<T: DeserializeOwned>(&self) -> StoreResult<Vec<(Key, T)>> {
        self.default_collection().get_all().await
    }

    /// Keys of the default collection in order.
    pub async fn keys(&self) -> StoreResult<Vec<Key>> {
        self.default_collection().keys().await
    }

    /// Number of records in the default collection.
    pub async fn count(&self) -> StoreResult<u64> {
        self.default_collection().count().await
    }

    /// Remove every record from the default collection.
    pub async fn clear(&self) -> StoreResult<u64> {
        self.default_collection().clear().await
    }

    // ── sessions ─────────────────────────────────────────────────────

    /// A key/value session private to `namespace`.
    pub fn local_session(&self, namespace: impl Into<String>) -> StoreResult<LocalSession> {
        LocalSession::new(self.clone(), namespace.into())
    }

    // ── internals ────────────────────────────────────────────────────

    fn lifecycle(&self) -> StoreResult<MutexGuard<'_, Lifecycle>> {
        self.inner
            .lifecycle
            .lock()
            .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))
    }

    /// Admit one operation: the open database, or `NotOpen`.
    ///
    /// The check and the admission happen under the lifecycle lock, so
    /// `close` waits for every operation that got past it.
    pub(crate) fn database(&self) -> StoreResult<Admitted> {
        let lifecycle = self.lifecycle()?;
        match &*lifecycle {
            Lifecycle::Ready { db, admissions, .. } => Ok(Admitted {
                db: db.clone(),
                _admission: admissions.clone(),
            }),
            other => {
                let err = StoreError::NotOpen {
                    name: self.inner.name.clone(),
                    state: other.state(),
                };
                warn!(%err, "operation refused");
                Err(err)
            }
        }
    }
}

/// An operation admitted while the store was `Ready`.
pub(crate) struct Admitted {
    db: Database,
    _admission: mpsc::Sender<()>,
}

impl Deref for Admitted {
    type Target = Database;

    fn deref(&self) -> &Database {
        &self.db
    }
}

fn validate_store_name(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidArgument(
            "store name must not be empty".to_string(),
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(StoreError::InvalidArgument(format!(
            "store name `{name}` contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

fn read_meta(conn: &Connection, key: &str) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM store_meta WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?)
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  Collection handle
// ═══════════════════════════════════════════════════════════════════════

/// Record operations bound to one collection of a store.
#[derive(Clone, Debug)]
pub struct Collection {
    store: KeyValueStore,
    name: String,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or overwrite a record; see [`KeyValueStore::put`].
    #[instrument(skip(self, record), fields(store = %self.store.name(), collection = %self.name))]
    pub async fn put<T>(&self, record: &T, key: Option<Key>) -> StoreResult<Key>
    where
        T: Serialize + ?Sized,
    {
        let db = self.store.database()?;
        let value = serde_json::to_value(record)?;
        let name = self.name.clone();
        let key = db
            .transaction(move |tx| collection::put(tx, &name, value, key))
            .await
            .inspect_err(|err| warn!(%err, "put failed"))?;
        debug!(%key, "record stored");
        Ok(key)
    }

    /// Fetch and decode a record, `None` if the key is absent.
    #[instrument(skip_all, fields(store = %self.store.name(), collection = %self.name))]
    pub async fn get<T: DeserializeOwned>(&self, key: impl Into<Key>) -> StoreResult<Option<T>> {
        let db = self.store.database()?;
        let key = key.into();
        let name = self.name.clone();
        let raw = db
            .execute(move |conn| collection::get(conn, &name, &key))
            .await
            .inspect_err(|err| warn!(%err, "get failed"))?;
        raw.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    /// Delete a record. Resolves with whether it existed.
    #[instrument(skip_all, fields(store = %self.store.name(), collection = %self.name))]
    pub async fn delete(&self, key: impl Into<Key>) -> StoreResult<bool> {
        let db = self.store.database()?;
        let key = key.into();
        let name = self.name.clone();
        db.transaction(move |tx| collection::delete(tx, &name, &key))
            .await
            .inspect_err(|err| warn!(%err, "delete failed"))
    }

    /// Every record in key order.
    pub async fn get_all<T: DeserializeOwned>(&self) -> StoreResult<Vec<(Key, T)>> {
        let db = self.store.database()?;
        let name = self.name.clone();
        let rows = db
            .execute(move |conn| collection::entries(conn, &name))
            .await
            .inspect_err(|err| warn!(%err, "get all failed"))?;
        rows.into_iter()
            .map(|(key, json)| -> StoreResult<(Key, T)> {
                Ok((key, serde_json::from_str(&json)?))
            })
            .collect()
    }

    /// Keys in order.
    pub async fn keys(&self) -> StoreResult<Vec<Key>> {
        let db = self.store.database()?;
        let name = self.name.clone();
        db.execute(move |conn| collection::keys(conn, &name))
            .await
            .inspect_err(|err| warn!(%err, "keys failed"))
    }

    pub async fn count(&self) -> StoreResult<u64> {
        let db = self.store.database()?;
        let name = self.name.clone();
        db.execute(move |conn| collection::count(conn, &name))
            .await
            .inspect_err(|err| warn!(%err, "count failed"))
    }

    /// Remove every record. Resolves with how many were removed.
    #[instrument(skip(self), fields(store = %self.store.name(), collection = %self.name))]
    pub async fn clear(&self) -> StoreResult<u64> {
        let db = self.store.database()?;
        let name = self.name.clone();
        db.transaction(move |tx| collection::clear(tx, &name))
            .await
            .inspect_err(|err| warn!(%err, "clear failed"))
    }
}

// ── tests ────────────────────────────────────────────────────────────
