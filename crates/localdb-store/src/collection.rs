//! Collections and the record-level SQL behind them.
//!
//! Everything here is synchronous and runs on the blocking pool, either
//! inside a transaction opened by [`Database::transaction`] or directly on
//! the connection for reads. `KeyValueStore` is the async surface over it.
//!
//! [`Database::transaction`]: crate::db::Database::transaction

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::key::Key;

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// How records in a new collection are keyed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Field of the record that holds its key. Dots descend into nested
    /// objects (`"meta.isbn"`).
    pub key_path: Option<String>,
    /// Generate integer keys for records stored without one.
    pub auto_increment: bool,
}

impl CollectionOptions {
    /// Records are keyed by their `field`.
    pub fn key_path(field: impl Into<String>) -> Self {
        Self {
            key_path: Some(field.into()),
            auto_increment: false,
        }
    }

    /// Keys are generated when the caller does not supply one.
    pub fn auto_increment() -> Self {
        Self {
            key_path: None,
            auto_increment: true,
        }
    }

    /// Builder-style toggle for auto increment.
    pub fn with_auto_increment(mut self, enabled: bool) -> Self {
        self.auto_increment = enabled;
        self
    }
}

/// Metadata of an existing collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub key_path: Option<String>,
    pub auto_increment: bool,
    /// Next generated key (only meaningful with auto increment).
    pub next_key: i64,
    /// Unix timestamp of creation.
    pub created_at: i64,
}

// ═══════════════════════════════════════════════════════════════════════
//  Collection DDL
// ═══════════════════════════════════════════════════════════════════════

/// Reject names that cannot identify a collection.
pub(crate) fn validate_name(name: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidArgument(
            "collection name must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn create(conn: &Connection, name: &str, options: &CollectionOptions) -> StoreResult<()> {
    validate_name(name)?;
    if let Some(path) = &options.key_path {
        if path.split('.').any(|segment| segment.is_empty()) {
            return Err(StoreError::InvalidArgument(format!(
                "invalid key path `{path}`"
            )));
        }
    }
    if exists(conn, name)? {
        return Err(StoreError::CollectionAlreadyExists(name.to_string()));
    }

    conn.execute(
        "INSERT INTO collections (name, key_path, auto_increment, next_key, created_at) \
         VALUES (?1, ?2, ?3, 1, ?4)",
        rusqlite::params![
            name,
            options.key_path,
            options.auto_increment,
            Utc::now().timestamp()
        ],
    )
    .map_err(request_failed("create collection"))?;

    debug!(collection = name, key_path = ?options.key_path, "collection created");
    Ok(())
}

/// Drop a collection and, through the foreign key cascade, its records.
pub(crate) fn remove(conn: &Connection, name: &str) -> StoreResult<()> {
    let removed = conn
        .execute("DELETE FROM collections WHERE name = ?1", [name])
        .map_err(request_failed("delete collection"))?;
    if removed == 0 {
        return Err(StoreError::CollectionNotFound(name.to_string()));
    }
    debug!(collection = name, "collection deleted");
    Ok(())
}

pub(crate) fn exists(conn: &Connection, name: &str) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM collections WHERE name = ?1", [name], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

/// Load one collection's metadata, or `CollectionNotFound`.
pub(crate) fn info(conn: &Connection, name: &str) -> StoreResult<CollectionInfo> {
    conn.query_row(
        "SELECT name, key_path, auto_increment, next_key, created_at \
         FROM collections WHERE name = ?1",
        [name],
        row_to_info,
    )
    .optional()?
    .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
}

pub(crate) fn list(conn: &Connection) -> StoreResult<Vec<CollectionInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, key_path, auto_increment, next_key, created_at \
         FROM collections ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], row_to_info)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionInfo> {
    Ok(CollectionInfo {
        name: row.get(0)?,
        key_path: row.get(1)?,
        auto_increment: row.get(2)?,
        next_key: row.get(3)?,
        created_at: row.get(4)?,
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  Records
// ═══════════════════════════════════════════════════════════════════════

/// Insert or overwrite a record and return the key it was stored under.
///
/// Must run inside a write transaction: key generation reads and bumps
/// the collection's generator.
pub(crate) fn put(
    conn: &Connection,
    collection: &str,
    mut record: Value,
    explicit: Option<Key>,
) -> StoreResult<Key> {
    let meta = info(conn, collection)?;
    let key = match resolve_key(&meta, &record, explicit)? {
        Resolved::Known(key) => key,
        Resolved::Generate => {
            // `next_key` saturates, so at the maximum it may already be taken.
            if meta.next_key == i64::MAX {
                return Err(StoreError::RequestFailed(format!(
                    "key generator of collection `{collection}` is exhausted"
                )));
            }
            let key = Key::Int(meta.next_key);
            if let Some(path) = &meta.key_path {
                inject_key(&mut record, path, &key)?;
            }
            key
        }
    };

    if meta.auto_increment {
        if let Some(n) = key.as_int() {
            if n >= meta.next_key {
                conn.execute(
                    "UPDATE collections SET next_key = ?1 WHERE name = ?2",
                    rusqlite::params![n.saturating_add(1), collection],
                )
                .map_err(request_failed("advance key generator"))?;
            }
        }
    }

    let value = serde_json::to_string(&record)?;
    conn.execute(
        "INSERT INTO records (collection, key, value, updated_at) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value, \
         updated_at = excluded.updated_at",
        rusqlite::params![collection, key, value, Utc::now().timestamp()],
    )
    .map_err(request_failed("put"))?;

    Ok(key)
}

/// Fetch the raw JSON of a record.
pub(crate) fn get(conn: &Connection, collection: &str, key: &Key) -> StoreResult<Option<String>> {
    ensure_exists(conn, collection)?;
    conn.query_row(
        "SELECT value FROM records WHERE collection = ?1 AND key = ?2",
        rusqlite::params![collection, key],
        |row| row.get(0),
    )
    .optional()
    .map_err(request_failed("get"))
}

/// Delete one record. Returns whether it existed.
pub(crate) fn delete(conn: &Connection, collection: &str, key: &Key) -> StoreResult<bool> {
    ensure_exists(conn, collection)?;
    let removed = conn
        .execute(
            "DELETE FROM records WHERE collection = ?1 AND key = ?2",
            rusqlite::params![collection, key],
        )
        .map_err(request_failed("delete"))?;
    Ok(removed > 0)
}

/// All records in key order.
pub(crate) fn entries(conn: &Connection, collection: &str) -> StoreResult<Vec<(Key, String)>> {
    ensure_exists(conn, collection)?;
    let mut stmt = conn.prepare(
        "SELECT key, value FROM records WHERE collection = ?1 ORDER BY key",
    )?;
    let rows = stmt
        .query_map([collection], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(request_failed("get all"))?;
    Ok(rows)
}

pub(crate) fn keys(conn: &Connection, collection: &str) -> StoreResult<Vec<Key>> {
    ensure_exists(conn, collection)?;
    let mut stmt =
        conn.prepare("SELECT key FROM records WHERE collection = ?1 ORDER BY key")?;
    let rows = stmt
        .query_map([collection], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(request_failed("keys"))?;
    Ok(rows)
}

pub(crate) fn count(conn: &Connection, collection: &str) -> StoreResult<u64> {
    ensure_exists(conn, collection)?;
    let count: i64 = conn
        .query_row(
            "SELECT count(*) FROM records WHERE collection = ?1",
            [collection],
            |row| row.get(0),
        )
        .map_err(request_failed("count"))?;
    Ok(count.max(0) as u64)
}

/// Remove every record, keeping the collection and its key generator.
pub(crate) fn clear(conn: &Connection, collection: &str) -> StoreResult<u64> {
    ensure_exists(conn, collection)?;
    let removed = conn
        .execute("DELETE FROM records WHERE collection = ?1", [collection])
        .map_err(request_failed("clear"))?;
    Ok(removed as u64)
}

fn ensure_exists(conn: &Connection, collection: &str) -> StoreResult<()> {
    if exists(conn, collection)? {
        Ok(())
    } else {
        Err(StoreError::CollectionNotFound(collection.to_string()))
    }
}

fn request_failed(op: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::RequestFailed(format!("{op}: {e}"))
}

// ── key resolution ───────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Resolved {
    Known(Key),
    Generate,
}

fn resolve_key(info: &CollectionInfo, record: &Value, explicit: Option<Key>) -> StoreResult<Resolved> {
    match (&info.key_path, explicit) {
        (Some(path), Some(_)) => Err(StoreError::InvalidArgument(format!(
            "collection `{}` uses key path `{path}`; an explicit key is not allowed",
            info.name
        ))),
        (Some(path), None) => {
            if !record.is_object() {
                return Err(StoreError::InvalidArgument(format!(
                    "collection `{}` uses key path `{path}`; records must be objects",
                    info.name
                )));
            }
            match extract_key(record, path) {
                Some(value) => Key::from_json(value).map(Resolved::Known),
                None if info.auto_increment => Ok(Resolved::Generate),
                None => Err(StoreError::InvalidArgument(format!(
                    "record has no value at key path `{path}`"
                ))),
            }
        }
        (None, Some(key)) => Ok(Resolved::Known(key)),
        (None, None) if info.auto_increment => Ok(Resolved::Generate),
        (None, None) => Err(StoreError::InvalidArgument(format!(
            "collection `{}` has no key path and no key generator; a key is required",
            info.name
        ))),
    }
}

fn extract_key<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |value, segment| value.as_object()?.get(segment))
}

/// Write a generated key into the record at `path`, creating missing
/// intermediate objects.
fn inject_key(record: &mut Value, path: &str, key: &Key) -> StoreResult<()> {
    let mut segments = path.split('.').peekable();
    let mut current = record;
    while let Some(segment) = segments.next() {
        let object = current.as_object_mut().ok_or_else(|| {
            StoreError::InvalidArgument(format!(
                "cannot write key into key path `{path}`: `{segment}` has a non-object parent"
            ))
        })?;
        if segments.peek().is_none() {
            object.insert(segment.to_string(), key.to_json());
            return Ok(());
        }
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
