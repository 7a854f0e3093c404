//! # gbc-store - Global Biodata catalogue persistence
//!
//! Versioned entity graph of biodata resources, the publications that describe
//! or cite them, and the grants that funded them.
//!
//! gbc-store provides:
//! - Generic upsert / delete / select primitives over a fixed SQLite table set
//! - Typed entities built from flexible attribute mappings
//! - Write cascades that keep junction rows and "latest" flags consistent
//! - Fetchers that rebuild nested entity graphs from flat (joined) rows

pub mod config;
pub mod entity;
pub mod fetch;
pub mod storage;
pub mod ui;

// Re-exports for convenient access
pub use entity::{
    Accession, ConnectionStatus, Entity, Field, Grant, GrantAgency, Input, MatchedAlias,
    Publication, Resource, ResourceMention, Url, Version,
};
pub use fetch::{FetchOptions, Fetched};
pub use storage::{CallerTxn, Filters, Row, Session, SqliteStore, TxnOwnership, UpsertOptions};

/// Result type alias for gbc-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for gbc-store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A row that must exist (e.g. after a no-op upsert) could not be found.
    #[error("Entity not found in table {table} with unique keys: {keys}")]
    NotFound { table: String, keys: String },

    #[error("Unknown column {column} in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Lock contention that may succeed when the whole transaction is replayed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Storage(e) => storage::retry::is_transient(e),
            _ => false,
        }
    }
}
