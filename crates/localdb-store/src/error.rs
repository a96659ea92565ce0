//! Error types for the localdb-store crate.
//!
//! All store operations return [`StoreError`] via [`StoreResult`].
//! Nothing is swallowed: a failure is logged where it leaves the store and
//! handed back to the caller.

use thiserror::Error;

use crate::store::StoreState;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening (or creating) the underlying database failed. The handle is
    /// now permanently unusable.
    #[error("failed to open store `{name}`: {reason}")]
    OpenFailed { name: String, reason: String },

    /// A data operation was issued against a store that is not `Ready`.
    #[error("store `{name}` is not open (state: {state})")]
    NotOpen { name: String, state: StoreState },

    /// A lifecycle call was made from a state that does not allow it.
    #[error("store `{name}` cannot be opened from state {state}")]
    InvalidState { name: String, state: StoreState },

    /// The named collection does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// A collection with this name already exists.
    #[error("collection already exists: {0}")]
    CollectionAlreadyExists(String),

    /// A transaction could not be started or committed.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// A single request inside a transaction failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The store on disk has a newer schema version than the one requested.
    #[error("requested version {requested} is lower than stored version {stored}")]
    VersionMismatch { requested: u32, stored: u32 },

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),

    /// The configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
