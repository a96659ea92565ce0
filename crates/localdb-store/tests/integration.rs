//! Integration tests for the localdb-store crate.
//!
//! These tests exercise the full store lifecycle against real SQLite
//! files on disk (via tempfile): open, reopen, version handling,
//! collections, sessions and concurrent writers.

use localdb_store::{
    CollectionOptions, Key, KeyValueStore, StoreConfig, StoreError, StoreState,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Room {
    id: i64,
    name: String,
    seats: u32,
}

fn room(id: i64, name: &str, seats: u32) -> Room {
    Room {
        id,
        name: name.to_string(),
        seats,
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Lifecycle on disk
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn open_creates_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::with_data_dir(dir.path().join("nested"));

    let store = KeyValueStore::new("books", config).unwrap();
    assert_eq!(store.state(), StoreState::Unopened);
    store.open(1).await.unwrap();
    assert_eq!(store.state(), StoreState::Ready);

    let path = store.path().unwrap();
    assert_eq!(path, dir.path().join("nested").join("books.db"));
    assert!(path.exists());
}

#[tokio::test]
async fn records_survive_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::with_data_dir(dir.path());

    let store = KeyValueStore::open_with("books", 1, config.clone())
        .await
        .unwrap();
    store
        .put(&json!({"title": "Dune"}), Some("dune".into()))
        .await
        .unwrap();
    let generated = store.put(&json!({"title": "Emma"}), None).await.unwrap();
    store
        .create_collection("authors", CollectionOptions::key_path("name"))
        .await
        .unwrap();
    store.close().await.unwrap();

    let reopened = KeyValueStore::open_with("books", 1, config).await.unwrap();
    assert_eq!(
        reopened.get::<serde_json::Value>("dune").await.unwrap(),
        Some(json!({"title": "Dune"}))
    );
    assert_eq!(
        reopened.get::<serde_json::Value>(generated).await.unwrap(),
        Some(json!({"title": "Emma"}))
    );
    // The generator continues where it stopped.
    assert_eq!(
        reopened.put(&json!({"title": "Ulysses"}), None).await.unwrap(),
        Key::Int(2)
    );

    let names: Vec<String> = reopened
        .collections()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["authors".to_string(), "default".to_string()]);
}

#[tokio::test]
async fn stores_with_different_names_are_separate() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::with_data_dir(dir.path());

    let books = KeyValueStore::open_with("books", 1, config.clone())
        .await
        .unwrap();
    let rooms = KeyValueStore::open_with("rooms", 1, config).await.unwrap();

    books.put("a book", Some(Key::Int(1))).await.unwrap();
    assert_eq!(rooms.get::<String>(1).await.unwrap(), None);
}

// ═══════════════════════════════════════════════════════════════════════
//  Versions
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn higher_version_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::with_data_dir(dir.path());

    let v1 = KeyValueStore::open_with("app", 1, config.clone())
        .await
        .unwrap();
    v1.put("kept", Some("k".into())).await.unwrap();
    v1.close().await.unwrap();

    let v2 = KeyValueStore::open_with("app", 2, config.clone())
        .await
        .unwrap();
    assert_eq!(v2.version(), Some(2));
    assert_eq!(v2.get::<String>("k").await.unwrap().as_deref(), Some("kept"));
    v2.close().await.unwrap();

    // Version 1 is now too old.
    let stale = KeyValueStore::new("app", config).unwrap();
    let err = stale.open(1).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::VersionMismatch {
            requested: 1,
            stored: 2
        }
    ));
    assert_eq!(stale.state(), StoreState::Failed);
}

#[tokio::test]
async fn open_failure_is_reported_and_permanent() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the data directory should be.
    let blocker = dir.path().join("occupied");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let store = KeyValueStore::new("books", StoreConfig::with_data_dir(&blocker)).unwrap();
    let err = store.open(1).await.unwrap_err();
    assert!(matches!(err, StoreError::OpenFailed { ref name, .. } if name == "books"));
    assert_eq!(store.state(), StoreState::Failed);

    assert!(matches!(
        store.get::<String>("k").await.unwrap_err(),
        StoreError::NotOpen {
            state: StoreState::Failed,
            ..
        }
    ));
}

// ═══════════════════════════════════════════════════════════════════════
//  Collections
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn keyed_collection_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = KeyValueStore::open_with("booking", 1, StoreConfig::with_data_dir(dir.path()))
        .await
        .unwrap();

    store
        .create_collection("rooms", CollectionOptions::key_path("id"))
        .await
        .unwrap();
    let rooms = store.collection("rooms");

    for r in [room(3, "Blue", 10), room(1, "Red", 4), room(2, "Green", 8)] {
        rooms.put(&r, None).await.unwrap();
    }
    assert_eq!(rooms.count().await.unwrap(), 3);

    let all: Vec<(Key, Room)> = rooms.get_all().await.unwrap();
    let names: Vec<&str> = all.iter().map(|(_, r)| r.name.as_str()).collect();
    assert_eq!(names, vec!["Red", "Green", "Blue"]);

    // Overwrite through the key path.
    rooms.put(&room(1, "Red", 6), None).await.unwrap();
    assert_eq!(rooms.get::<Room>(1).await.unwrap().unwrap().seats, 6);

    assert!(rooms.delete(2).await.unwrap());
    assert_eq!(rooms.keys().await.unwrap(), vec![Key::Int(1), Key::Int(3)]);

    let info = store.collection_info("rooms").await.unwrap();
    assert_eq!(info.key_path.as_deref(), Some("id"));

    store.delete_collection("rooms").await.unwrap();
    assert!(matches!(
        rooms.count().await.unwrap_err(),
        StoreError::CollectionNotFound(_)
    ));
}

#[tokio::test]
async fn record_without_key_in_keyed_collection_is_rejected() {
    let store = KeyValueStore::open_with("booking", 1, StoreConfig::in_memory())
        .await
        .unwrap();
    store
        .create_collection("users", CollectionOptions::key_path("email"))
        .await
        .unwrap();

    let err = store
        .collection("users")
        .put(&json!({"name": "no email"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
    assert_eq!(store.collection("users").count().await.unwrap(), 0);
}

#[tokio::test]
async fn plain_collection_requires_a_key() {
    let store = KeyValueStore::open_with("booking", 1, StoreConfig::in_memory())
        .await
        .unwrap();
    store
        .create_collection("notes", CollectionOptions::default())
        .await
        .unwrap();

    let notes = store.collection("notes");
    assert!(matches!(
        notes.put("no key", None).await.unwrap_err(),
        StoreError::InvalidArgument(_)
    ));
    notes.put("with key", Some("n1".into())).await.unwrap();
    assert_eq!(notes.count().await.unwrap(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Sessions
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn local_session_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::with_data_dir(dir.path());

    let store = KeyValueStore::open_with("app", 1, config.clone())
        .await
        .unwrap();
    let session = store.local_session("login").unwrap();
    session.set("user", &json!({"name": "sam"})).await.unwrap();
    store.close().await.unwrap();

    let store = KeyValueStore::open_with("app", 1, config).await.unwrap();
    let session = store.local_session("login").unwrap();
    assert_eq!(
        session.get::<serde_json::Value>("user").await.unwrap(),
        Some(json!({"name": "sam"}))
    );
    assert!(session.remove("user").await.unwrap());
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = KeyValueStore::open_with("busy", 1, StoreConfig::with_data_dir(dir.path()))
        .await
        .unwrap();

    let writers = (0..8_i64).map(|writer| {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 0..25_i64 {
                let key = Key::Text(format!("w{writer}-{i}"));
                store
                    .put(&json!({ "writer": writer, "i": i }), Some(key))
                    .await
                    .unwrap();
            }
        })
    });
    for handle in futures::future::join_all(writers).await {
        handle.unwrap();
    }

    assert_eq!(store.count().await.unwrap(), 200);
    let value: serde_json::Value = store.get("w7-24").await.unwrap().unwrap();
    assert_eq!(value, json!({ "writer": 7, "i": 24 }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_generated_keys_are_unique() {
    let store = KeyValueStore::open_with("busy", 1, StoreConfig::in_memory())
        .await
        .unwrap();

    let puts = (0..50).map(|i| {
        let store = store.clone();
        tokio::spawn(async move { store.put(&i, None).await.unwrap() })
    });
    let mut keys: Vec<Key> = futures::future::join_all(puts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 50);
    assert_eq!(store.count().await.unwrap(), 50);
}

#[tokio::test]
async fn close_waits_for_admitted_writes() {
    let store = KeyValueStore::open_with("drain", 1, StoreConfig::in_memory())
        .await
        .unwrap();

    let writer = store.clone();
    let pending = tokio::spawn(async move { writer.put("late", Some(Key::Int(1))).await });
    // Let the writer get admitted before closing.
    tokio::task::yield_now().await;
    let closed = store.close().await;

    closed.unwrap();
    // The write either landed before close or was refused cleanly.
    match pending.await.unwrap() {
        Ok(key) => assert_eq!(key, Key::Int(1)),
        Err(err) => assert!(matches!(err, StoreError::NotOpen { .. })),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writes_finish_before_close_returns() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::with_data_dir(dir.path());
    let store = KeyValueStore::open_with("racing", 1, config.clone())
        .await
        .unwrap();

    let writers: Vec<_> = (0..64_i64)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { (i, store.put(&json!({ "n": i }), Some(Key::Int(i))).await) })
        })
        .collect();
    tokio::task::yield_now().await;
    store.close().await.unwrap();

    // Snapshot the file right after close, then again a little later.
    let reader = KeyValueStore::open_with("racing", 1, config).await.unwrap();
    let at_close = reader.keys().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(reader.keys().await.unwrap(), at_close);

    let mut stored = 0;
    for writer in writers {
        let (i, result) = writer.await.unwrap();
        match result {
            Ok(key) => {
                assert!(at_close.contains(&key), "write {i} landed after close");
                stored += 1;
            }
            Err(err) => assert!(matches!(
                err,
                StoreError::NotOpen {
                    state: StoreState::Closed,
                    ..
                }
            )),
        }
    }
    assert_eq!(stored, at_close.len());
}
