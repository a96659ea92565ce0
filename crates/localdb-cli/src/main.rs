//! CLI entry point for LocalDB.
//!
//! This binary provides the `localdb` command: open one named store, run a
//! single subcommand against it, close it.

mod cli;
mod helpers;

use anyhow::{Context, Result};
use clap::Parser;
use localdb_store::{CollectionOptions, Key, KeyValueStore};
use tracing::info;

use crate::cli::{Cli, Commands, LocalAction};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    helpers::init_tracing(if cli.verbose { "debug" } else { "warn" });

    let config = helpers::resolve_config(
        cli.config.as_deref(),
        helpers::env_data_dir(),
        cli.data_dir.clone(),
    )?;

    let store = KeyValueStore::open_with(cli.store.as_str(), cli.schema_version, config)
        .await
        .with_context(|| format!("failed to open store `{}`", cli.store))?;
    info!(store = %cli.store, version = cli.schema_version, "store opened");

    let outcome = run(&store, cli.command).await;
    store.close().await.context("failed to close store")?;
    outcome
}

async fn run(store: &KeyValueStore, command: Commands) -> Result<()> {
    match command {
        Commands::Put {
            collection,
            key,
            json,
        } => cmd_put(store, collection, key, &json).await,
        Commands::Get { collection, key } => cmd_get(store, collection, &key).await,
        Commands::Delete { collection, key } => cmd_delete(store, collection, &key).await,
        Commands::List { collection } => cmd_list(store, collection).await,
        Commands::Collections => cmd_collections(store).await,
        Commands::CreateCollection {
            name,
            key_path,
            auto_increment,
        } => {
            let options = CollectionOptions {
                key_path,
                auto_increment,
            };
            store
                .create_collection(&name, options)
                .await
                .with_context(|| format!("failed to create collection `{name}`"))?;
            println!("created {name}");
            Ok(())
        }
        Commands::DropCollection { name } => {
            store
                .delete_collection(&name)
                .await
                .with_context(|| format!("failed to drop collection `{name}`"))?;
            println!("dropped {name}");
            Ok(())
        }
        Commands::Local { namespace, action } => cmd_local(store, &namespace, action).await,
        Commands::Info => cmd_info(store).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: records
// ---------------------------------------------------------------------------

fn target(store: &KeyValueStore, collection: Option<String>) -> localdb_store::Collection {
    let name = collection.unwrap_or_else(|| store.default_collection_name().to_string());
    store.collection(name)
}

async fn cmd_put(
    store: &KeyValueStore,
    collection: Option<String>,
    key: Option<String>,
    json: &str,
) -> Result<()> {
    let record = helpers::parse_json("record", json)?;
    let key = key.as_deref().map(Key::parse_lenient);
    let stored = target(store, collection)
        .put(&record, key)
        .await
        .context("put failed")?;
    println!("{stored}");
    Ok(())
}

async fn cmd_get(store: &KeyValueStore, collection: Option<String>, key: &str) -> Result<()> {
    let key = Key::parse_lenient(key);
    match target(store, collection)
        .get::<serde_json::Value>(key.clone())
        .await
        .context("get failed")?
    {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        None => anyhow::bail!("no record with key {key}"),
    }
}

async fn cmd_delete(store: &KeyValueStore, collection: Option<String>, key: &str) -> Result<()> {
    let key = Key::parse_lenient(key);
    let existed = target(store, collection)
        .delete(key.clone())
        .await
        .context("delete failed")?;
    if existed {
        println!("deleted {key}");
    } else {
        println!("no record with key {key}");
    }
    Ok(())
}

async fn cmd_list(store: &KeyValueStore, collection: Option<String>) -> Result<()> {
    let records: Vec<(Key, serde_json::Value)> = target(store, collection)
        .get_all()
        .await
        .context("list failed")?;
    for (key, record) in records {
        println!("{key}\t{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: collections / info
// ---------------------------------------------------------------------------

async fn cmd_collections(store: &KeyValueStore) -> Result<()> {
    for info in store.collections().await? {
        let key_path = info.key_path.as_deref().unwrap_or("-");
        let generator = if info.auto_increment { "auto" } else { "-" };
        println!("{}\tkey_path={key_path}\tkeys={generator}", info.name);
    }
    Ok(())
}

async fn cmd_info(store: &KeyValueStore) -> Result<()> {
    println!();
    println!("  Store:      {}", store.name());
    println!("  State:      {}", store.state());
    if let Some(version) = store.version() {
        println!("  Version:    {version}");
    }
    match store.path() {
        Some(path) => println!("  Path:       {}", path.display()),
        None => println!("  Path:       (in memory)"),
    }
    println!("  Default:    {}", store.default_collection_name());
    println!();
    for info in store.collections().await? {
        let count = store.collection(info.name.as_str()).count().await?;
        println!("  {:<20} {count} record(s)", info.name);
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: local
// ---------------------------------------------------------------------------

async fn cmd_local(store: &KeyValueStore, namespace: &str, action: LocalAction) -> Result<()> {
    let session = store.local_session(namespace)?;
    match action {
        LocalAction::Set { key, json } => {
            let value = helpers::parse_json("value", &json)?;
            session.set(&key, &value).await?;
        }
        LocalAction::Get { key } => match session.get::<serde_json::Value>(&key).await? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => anyhow::bail!("no value for {key} in {namespace}"),
        },
        LocalAction::Del { key } => {
            if !session.remove(&key).await? {
                println!("no value for {key} in {namespace}");
            }
        }
        LocalAction::Keys => {
            for key in session.keys().await? {
                println!("{key}");
            }
        }
    }
    Ok(())
}
