//! CLI argument definitions for LocalDB.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// LocalDB -- inspect and edit local key-value stores.
#[derive(Parser)]
#[command(
    name = "localdb",
    version,
    about = "LocalDB -- local key-value stores",
    long_about = "Open a named, versioned local store and read or write its collections \
                  and sessions. Records are JSON."
)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the store files (overrides config and LOCALDB_DATA_DIR).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Name of the store to open.
    pub store: String,

    /// Schema version to open the store at.
    #[arg(long = "schema-version", default_value_t = 1)]
    pub schema_version: u32,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Insert or overwrite a JSON record.
    Put {
        /// Target collection (defaults to the default collection).
        #[arg(long)]
        collection: Option<String>,

        /// Explicit key. Integers are stored as integer keys.
        #[arg(long, short)]
        key: Option<String>,

        /// The record as JSON.
        json: String,
    },

    /// Print a record.
    Get {
        #[arg(long)]
        collection: Option<String>,

        key: String,
    },

    /// Delete a record.
    Delete {
        #[arg(long)]
        collection: Option<String>,

        key: String,
    },

    /// Print every record of a collection, one JSON line each.
    List {
        #[arg(long)]
        collection: Option<String>,
    },

    /// List collections.
    Collections,

    /// Create a collection.
    CreateCollection {
        name: String,

        /// Record field holding the key (dots for nested fields).
        #[arg(long)]
        key_path: Option<String>,

        /// Generate integer keys for records stored without one.
        #[arg(long)]
        auto_increment: bool,
    },

    /// Delete a collection and all of its records.
    DropCollection { name: String },

    /// Read and write a namespaced local session.
    Local {
        /// Session namespace.
        #[arg(long, short)]
        namespace: String,

        #[command(subcommand)]
        action: LocalAction,
    },

    /// Show store state, version and collection sizes.
    Info,
}

/// Actions on a local session.
#[derive(Subcommand)]
pub enum LocalAction {
    /// Store a JSON value.
    Set { key: String, json: String },
    /// Print a value.
    Get { key: String },
    /// Delete a value.
    Del { key: String },
    /// List keys.
    Keys,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_put_with_key() {
        let cli = Cli::try_parse_from([
            "localdb",
            "books",
            "put",
            "--collection",
            "novels",
            "--key",
            "7",
            r#"{"title":"Dune"}"#,
        ])
        .unwrap();
        assert_eq!(cli.store, "books");
        assert_eq!(cli.schema_version, 1);
        match cli.command {
            Commands::Put {
                collection,
                key,
                json,
            } => {
                assert_eq!(collection.as_deref(), Some("novels"));
                assert_eq!(key.as_deref(), Some("7"));
                assert_eq!(json, r#"{"title":"Dune"}"#);
            }
            _ => panic!("expected put"),
        }
    }

    #[test]
    fn parses_local_session_action() {
        let cli = Cli::try_parse_from([
            "localdb",
            "--data-dir",
            "/tmp/x",
            "app",
            "--schema-version",
            "3",
            "local",
            "--namespace",
            "login",
            "get",
            "user",
        ])
        .unwrap();
        assert_eq!(cli.schema_version, 3);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        match cli.command {
            Commands::Local {
                namespace,
                action: LocalAction::Get { key },
            } => {
                assert_eq!(namespace, "login");
                assert_eq!(key, "user");
            }
            _ => panic!("expected local get"),
        }
    }
}
