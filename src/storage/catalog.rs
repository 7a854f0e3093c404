//! Schema catalog - primary/unique keys, columns and declared lengths per table
//!
//! Keys come from a curated list when one exists (junction tables have no
//! unique constraint worth introspecting) and from live introspection otherwise.
//! Introspection results are cached for the lifetime of the owning store.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::Connection;

use crate::{Error, Result};

/// Curated (table, primary keys, unique keys)
const CURATED_KEYS: &[(&str, &[&str], &[&str])] = &[
    ("resource", &["id"], &["short_name", "url_id", "version_id"]),
    ("url", &["id"], &["url"]),
    ("connection_status", &["url_id", "date"], &[]),
    ("version", &["id"], &["name", "date"]),
    ("publication", &["id"], &["pubmed_id", "pmc_id"]),
    ("grant", &["id"], &["ext_grant_id", "grant_agency_id"]),
    ("grant_agency", &["id"], &["name_hash"]),
    ("resource_publication", &["resource_id", "publication_id"], &[]),
    ("resource_grant", &["resource_id", "grant_id"], &[]),
    ("publication_grant", &["publication_id", "grant_id"], &[]),
    ("accession", &["accession"], &[]),
    ("accession_publication", &["accession", "publication_id"], &[]),
    (
        "resource_mention",
        &["publication_id", "resource_id", "version_id", "matched_alias"],
        &[],
    ),
    ("long_text", &["id"], &[]),
];

/// A column as declared in the schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    /// Declared character length, e.g. 255 for `VARCHAR(255)`
    pub max_len: Option<usize>,
    /// 1-based position in the primary key, 0 when not part of it
    pub pk: usize,
}

/// Foreign key edge: `table.from` references `references.to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub from: String,
    pub references: String,
    pub to: String,
}

fn length_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)char\s*\(\s*(\d+)\s*\)").expect("valid regex"))
}

/// Parse the declared length from a column type such as `VARCHAR(255)`
pub fn declared_length(decl_type: &str) -> Option<usize> {
    length_pattern()
        .captures(decl_type)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Per-store cache of table metadata
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    columns: RefCell<HashMap<String, Vec<ColumnInfo>>>,
    unique_keys: RefCell<HashMap<String, Vec<String>>>,
    foreign_keys: RefCell<HashMap<String, Vec<ForeignKey>>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn curated(table: &str) -> Option<(&'static [&'static str], &'static [&'static str])> {
        CURATED_KEYS
            .iter()
            .find(|(name, _, _)| *name == table)
            .map(|(_, pk, uk)| (*pk, *uk))
    }

    /// Columns of a table in declaration order
    pub fn columns(&self, conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
        if let Some(cols) = self.columns.borrow().get(table) {
            return Ok(cols.clone());
        }

        let mut stmt = conn.prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")?;
        let cols: Vec<ColumnInfo> = stmt
            .query_map([table], |row| {
                let decl_type: String = row.get(1)?;
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    max_len: declared_length(&decl_type),
                    decl_type,
                    pk: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        if cols.is_empty() {
            return Err(Error::Schema(format!("table {} does not exist", table)));
        }

        self.columns.borrow_mut().insert(table.to_string(), cols.clone());
        Ok(cols)
    }

    pub fn column_names(&self, conn: &Connection, table: &str) -> Result<Vec<String>> {
        Ok(self.columns(conn, table)?.into_iter().map(|c| c.name).collect())
    }

    pub fn has_column(&self, conn: &Connection, table: &str, column: &str) -> Result<bool> {
        Ok(self.columns(conn, table)?.iter().any(|c| c.name == column))
    }

    pub fn primary_keys(&self, conn: &Connection, table: &str) -> Result<Vec<String>> {
        if let Some((pk, _)) = Self::curated(table) {
            return Ok(pk.iter().map(|s| s.to_string()).collect());
        }

        let mut pk_cols: Vec<ColumnInfo> = self
            .columns(conn, table)?
            .into_iter()
            .filter(|c| c.pk > 0)
            .collect();
        pk_cols.sort_by_key(|c| c.pk);
        Ok(pk_cols.into_iter().map(|c| c.name).collect())
    }

    /// Columns of the first UNIQUE constraint, or empty when there is none
    pub fn unique_keys(&self, conn: &Connection, table: &str) -> Result<Vec<String>> {
        if let Some((_, uk)) = Self::curated(table) {
            return Ok(uk.iter().map(|s| s.to_string()).collect());
        }
        if let Some(uk) = self.unique_keys.borrow().get(table) {
            return Ok(uk.clone());
        }

        let index_name: Option<String> = {
            let mut stmt = conn.prepare(
                "SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1 AND origin = 'u' ORDER BY seq",
            )?;
            let mut names = stmt.query_map([table], |row| row.get::<_, String>(0))?;
            names.next().transpose()?
        };

        let uk = match index_name {
            Some(index) => {
                let mut stmt = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
                let cols = stmt
                    .query_map([index], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                cols
            }
            None => Vec::new(),
        };

        self.unique_keys.borrow_mut().insert(table.to_string(), uk.clone());
        Ok(uk)
    }

    /// Primary keys followed by unique keys
    pub fn all_keys(&self, conn: &Connection, table: &str) -> Result<Vec<String>> {
        let mut keys = self.primary_keys(conn, table)?;
        for uk in self.unique_keys(conn, table)? {
            if !keys.contains(&uk) {
                keys.push(uk);
            }
        }
        Ok(keys)
    }

    /// The single integer primary key column, if the table has one
    pub fn surrogate_key(&self, conn: &Connection, table: &str) -> Result<Option<String>> {
        let pk = self.primary_keys(conn, table)?;
        if pk.len() != 1 {
            return Ok(None);
        }
        let is_integer = self
            .columns(conn, table)?
            .iter()
            .any(|c| c.name == pk[0] && c.decl_type.to_uppercase().contains("INT"));
        Ok(is_integer.then(|| pk[0].clone()))
    }

    /// Declared maximum length of a column, cached with the column list
    pub fn max_len(&self, conn: &Connection, table: &str, column: &str) -> Result<Option<usize>> {
        Ok(self
            .columns(conn, table)?
            .into_iter()
            .find(|c| c.name == column)
            .and_then(|c| c.max_len))
    }

    pub fn foreign_keys(&self, conn: &Connection, table: &str) -> Result<Vec<ForeignKey>> {
        if let Some(fks) = self.foreign_keys.borrow().get(table) {
            return Ok(fks.clone());
        }

        let mut stmt = conn.prepare(
            "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
        )?;
        let fks = stmt
            .query_map([table], |row| {
                Ok(ForeignKey {
                    from: row.get(0)?,
                    references: row.get(1)?,
                    to: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        self.foreign_keys.borrow_mut().insert(table.to_string(), fks.clone());
        Ok(fks)
    }

    /// Column pairs `(base column, joined column)` linking two tables by foreign key
    pub fn join_columns(&self, conn: &Connection, base: &str, joined: &str) -> Result<Vec<(String, String)>> {
        let pairs: Vec<(String, String)> = self
            .foreign_keys(conn, joined)?
            .into_iter()
            .filter(|fk| fk.references == base)
            .map(|fk| (fk.to, fk.from))
            .collect();
        if !pairs.is_empty() {
            return Ok(pairs);
        }

        let pairs: Vec<(String, String)> = self
            .foreign_keys(conn, base)?
            .into_iter()
            .filter(|fk| fk.references == joined)
            .map(|fk| (fk.from, fk.to))
            .collect();
        if pairs.is_empty() {
            return Err(Error::Schema(format!(
                "no foreign key relationship between {} and {}",
                base, joined
            )));
        }
        Ok(pairs)
    }
}
