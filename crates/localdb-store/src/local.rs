//! Namespaced key/value sessions.
//!
//! A [`LocalSession`] is a small JSON key/value area owned by one caller,
//! kept inside an opened store. Sessions with different namespaces never
//! see each other's keys. Every call goes through the store's lifecycle
//! check, so a session stops working as soon as its store is closed.

use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::KeyValueStore;

/// Caller-scoped key/value session.
#[derive(Clone, Debug)]
pub struct LocalSession {
    store: KeyValueStore,
    namespace: String,
}

impl LocalSession {
    pub(crate) fn new(store: KeyValueStore, namespace: String) -> StoreResult<Self> {
        if namespace.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "session namespace must not be empty".to_string(),
            ));
        }
        Ok(Self { store, namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Store `value` under `key` (insert or update).
    #[instrument(skip(self, value), fields(namespace = %self.namespace))]
    pub async fn set<T>(&self, key: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize + ?Sized,
    {
        let db = self.store.database()?;
        let namespace = self.namespace.clone();
        let key = key.to_string();
        let value = serde_json::to_string(value)?;
        db.execute(move |conn| {
            conn.execute(
                "INSERT INTO local_items (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, \
                 updated_at = excluded.updated_at",
                rusqlite::params![namespace, key, value, Utc::now().timestamp()],
            )?;
            debug!(key = %key, "local item set");
            Ok(())
        })
        .await
        .inspect_err(|err| warn!(%err, "local set failed"))
    }

    /// Get and decode the value under `key`, returning `None` if not found.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let db = self.store.database()?;
        let namespace = self.namespace.clone();
        let key = key.to_string();
        let raw: Option<String> = db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM local_items WHERE namespace = ?1 AND key = ?2",
                        rusqlite::params![namespace, key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await
            .inspect_err(|err| warn!(%err, "local get failed"))?;
        raw.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    /// Delete a key, returning `true` if it existed.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn remove(&self, key: &str) -> StoreResult<bool> {
        let db = self.store.database()?;
        let namespace = self.namespace.clone();
        let key = key.to_string();
        db.execute(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM local_items WHERE namespace = ?1 AND key = ?2",
                rusqlite::params![namespace, key],
            )?;
            Ok(deleted > 0)
        })
        .await
        .inspect_err(|err| warn!(%err, "local remove failed"))
    }

    /// All keys of this session, sorted.
    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        let db = self.store.database()?;
        let namespace = self.namespace.clone();
        db.execute(move |conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM local_items WHERE namespace = ?1 ORDER BY key")?;
            let keys = stmt
                .query_map([namespace], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
        .inspect_err(|err| warn!(%err, "local keys failed"))
    }

    /// Remove every key of this session. Returns how many were removed.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn clear(&self) -> StoreResult<u64> {
        let db = self.store.database()?;
        let namespace = self.namespace.clone();
        db.execute(move |conn| {
            let deleted =
                conn.execute("DELETE FROM local_items WHERE namespace = ?1", [namespace])?;
            Ok(deleted as u64)
        })
        .await
        .inspect_err(|err| warn!(%err, "local clear failed"))
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use serde::Deserialize;

    async fn setup_store() -> KeyValueStore {
        KeyValueStore::open_with("local", 1, StoreConfig::in_memory())
            .await
            .unwrap()
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cart {
        items: Vec<String>,
    }

    #[tokio::test]
    async fn get_nonexistent_returns_none() {
        let store = setup_store().await;
        let session = store.local_session("page1").unwrap();

        assert!(session.get::<String>("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_and_get() {
        let store = setup_store().await;
        let session = store.local_session("page1").unwrap();

        let cart = Cart {
            items: vec!["Dune".to_string()],
        };
        session.set("cart", &cart).await.unwrap();
        assert_eq!(session.get::<Cart>("cart").await.unwrap(), Some(cart));
    }

    #[tokio::test]
    async fn set_overwrites() {
        let store = setup_store().await;
        let session = store.local_session("page1").unwrap();

        session.set("user", "old").await.unwrap();
        session.set("user", "new").await.unwrap();
        assert_eq!(
            session.get::<String>("user").await.unwrap(),
            Some("new".to_string())
        );
    }

    #[tokio::test]
    async fn remove_existing_and_missing() {
        let store = setup_store().await;
        let session = store.local_session("page1").unwrap();

        session.set("token", &42).await.unwrap();
        assert!(session.remove("token").await.unwrap());
        assert!(session.get::<i64>("token").await.unwrap().is_none());
        assert!(!session.remove("token").await.unwrap());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = setup_store().await;
        let books = store.local_session("books").unwrap();
        let rooms = store.local_session("rooms").unwrap();

        books.set("selected", &1).await.unwrap();
        rooms.set("selected", &2).await.unwrap();

        assert_eq!(books.get::<i64>("selected").await.unwrap(), Some(1));
        assert_eq!(rooms.get::<i64>("selected").await.unwrap(), Some(2));

        assert_eq!(books.clear().await.unwrap(), 1);
        assert!(books.keys().await.unwrap().is_empty());
        assert_eq!(rooms.keys().await.unwrap(), vec!["selected".to_string()]);
    }

    #[tokio::test]
    async fn empty_namespace_is_rejected() {
        let store = setup_store().await;
        assert!(matches!(
            store.local_session(""),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn wrong_type_is_a_json_error() {
        let store = setup_store().await;
        let session = store.local_session("page1").unwrap();

        session.set("n", "not a number").await.unwrap();
        assert!(matches!(
            session.get::<i64>("n").await,
            Err(StoreError::Json(_))
        ));
    }
}
