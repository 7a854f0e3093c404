//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with the catalogue tables:
//! - resource, url, connection_status, version
//! - publication, grant, grant_agency
//! - accession, resource_mention, long_text
//! - junctions: resource_publication, resource_grant, publication_grant, accession_publication

pub mod catalog;
pub mod query;
pub mod retry;
pub mod schema;
pub mod sqlite;
pub mod upsert;

pub use catalog::{ColumnInfo, ForeignKey, SchemaCatalog};
pub use query::{clear_latest, delete_where, detach, select_where, Filters, Select};
pub use retry::RetryPolicy;
pub use sqlite::{CallerTxn, Session, SqliteStore, TableCount, TxnOwnership};
pub use upsert::{long_text_id, long_text_token, upsert, upsert_outcome, UpsertOptions, UpsertOutcome};

/// A table row as an attribute mapping (column name to value)
pub type Row = serde_json::Map<String, serde_json::Value>;
