//! Upsert engine - insert, or update the row that owns the conflicting key
//!
//! Columns set on conflict are the non-key, non-null columns of the row. The update
//! only fires when one of them differs, so a zero change count means the stored row
//! already matched and its id is resolved from the row's own keys.
//!
//! SQLite never reports a conflict on a unique key holding NULL. A row that leaves
//! part of its unique key unset is therefore matched with `IS` first, and rewrites
//! the row found there instead of adding a twin.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use super::query::{join_list, quote, to_sql_value};
use super::sqlite::Session;
use super::Row;
use crate::{Error, Result};

/// Per-call upsert switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Move strings longer than the column's declared length into `long_text`
    pub offload_long_text: bool,
}

impl UpsertOptions {
    pub fn offload() -> Self {
        Self {
            offload_long_text: true,
        }
    }
}

/// What an upsert did to the table, with the resulting id (`0` for tables without a surrogate id)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
    Unchanged(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) | UpsertOutcome::Unchanged(id) => *id,
        }
    }
}

/// Token stored in place of an offloaded value
pub fn long_text_token(id: i64) -> String {
    format!("long_text({})", id)
}

/// Id inside a `long_text(<id>)` token
pub fn long_text_id(value: &str) -> Option<i64> {
    value
        .strip_prefix("long_text(")?
        .strip_suffix(')')?
        .parse()
        .ok()
}

/// Insert-or-update a row and return its id
pub fn upsert(session: &Session<'_>, table: &str, row: &Row, options: UpsertOptions) -> Result<i64> {
    upsert_outcome(session, table, row, options).map(|outcome| outcome.id())
}

/// Insert-or-update a row and report what happened
pub fn upsert_outcome(
    session: &Session<'_>,
    table: &str,
    row: &Row,
    options: UpsertOptions,
) -> Result<UpsertOutcome> {
    let conn = session.conn();
    let catalog = session.catalog();

    let columns = catalog.column_names(conn, table)?;
    if let Some(unknown) = row.keys().find(|k| !columns.contains(*k)) {
        return Err(Error::UnknownColumn {
            table: table.to_string(),
            column: unknown.clone(),
        });
    }

    let normalized: Row = row
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), normalize(v)))
        .collect();
    if normalized.is_empty() {
        return Err(Error::Validation(format!("nothing to write to {}", table)));
    }

    let primary_keys = catalog.primary_keys(conn, table)?;
    let unique_keys = catalog.unique_keys(conn, table)?;
    let all_keys = catalog.all_keys(conn, table)?;
    let surrogate = catalog.surrogate_key(conn, table)?;

    tracing::debug!(
        "Upserting into {} (primary keys: {}) {:?}",
        table,
        primary_keys.join(", "),
        normalized
    );

    session.write(table, |conn| {
        // fresh copy per attempt: offload tokens of a rolled-back attempt dangle
        let mut values = normalized.clone();
        if options.offload_long_text {
            offload_long_values(session, table, &mut values)?;
        }

        if let Some(pk) = &surrogate {
            if !values.contains_key(pk) && partially_keyed(&unique_keys, &values) {
                if let Some(id) = find_by_unique_keys(session, table, pk, &unique_keys, &values)? {
                    values.insert(pk.clone(), Value::from(id));
                }
            }
        }

        let existed = conflicting_row_exists(session, table, &values, &[&primary_keys, &unique_keys])?;

        let insert_cols: Vec<&String> = values.keys().collect();
        let set_cols: Vec<&String> = insert_cols
            .iter()
            .copied()
            .filter(|c| !all_keys.contains(*c))
            .collect();
        let params: Vec<SqlValue> = values.values().map(to_sql_value).collect();

        let column_list = insert_cols.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
        let marks = vec!["?"; insert_cols.len()].join(", ");
        let mut sql = if set_cols.is_empty() {
            // pure key rows: a duplicate is a no-op
            format!("INSERT OR IGNORE INTO {} ({}) VALUES ({})", quote(table), column_list, marks)
        } else {
            let assignments = set_cols
                .iter()
                .map(|c| format!("{} = excluded.{}", quote(c), quote(c)))
                .collect::<Vec<_>>()
                .join(", ");
            let changed = set_cols
                .iter()
                .map(|c| format!("{}.{} IS NOT excluded.{}", quote(table), quote(c), quote(c)))
                .collect::<Vec<_>>()
                .join(" OR ");
            format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO UPDATE SET {} WHERE {}",
                quote(table),
                column_list,
                marks,
                assignments,
                changed
            )
        };

        let (changes, returned_id) = match &surrogate {
            Some(pk) => {
                sql.push_str(&format!(" RETURNING {}", quote(pk)));
                let mut stmt = conn.prepare(&sql)?;
                let ids = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), |r| r.get::<_, i64>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                drop(stmt);
                (ids.len(), ids.first().copied())
            }
            None => (conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?, None),
        };

        let outcome = if changes == 0 {
            let id = match &surrogate {
                Some(pk) => match values.get(pk).and_then(Value::as_i64) {
                    Some(id) => id,
                    None => id_from_unique_keys(session, table, pk, &unique_keys, &values)?,
                },
                None => 0,
            };
            UpsertOutcome::Unchanged(id)
        } else {
            let id = returned_id.unwrap_or(0);
            if existed {
                UpsertOutcome::Updated(id)
            } else {
                UpsertOutcome::Inserted(id)
            }
        };

        tracing::debug!("{}: {:?}", table, outcome);
        Ok(outcome)
    })
}

/// Lists become "; "-joined text, objects become JSON text
fn normalize(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::String(join_list(items)),
        Value::Object(_) => Value::String(value.to_string()),
        other => other.clone(),
    }
}

fn offload_long_values(session: &Session<'_>, table: &str, values: &mut Row) -> Result<()> {
    let conn = session.conn();
    for (column, value) in values.iter_mut() {
        let Value::String(text) = &mut *value else { continue };
        let Some(max_len) = session.catalog().max_len(conn, table, column)? else {
            continue;
        };
        if text.chars().count() <= max_len {
            continue;
        }

        let mut long_row = Row::new();
        long_row.insert("text".to_string(), Value::String(std::mem::take(text)));
        let id = upsert(session, "long_text", &long_row, UpsertOptions::default())?;
        tracing::debug!("Offloaded {}.{} to long_text {}", table, column, id);
        *value = Value::String(long_text_token(id));
    }
    Ok(())
}

/// Whether a stored row already holds one of the given key groups
fn conflicting_row_exists(
    session: &Session<'_>,
    table: &str,
    values: &Row,
    key_groups: &[&Vec<String>],
) -> Result<bool> {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for group in key_groups {
        // NULLs never conflict
        if group.is_empty() || group.iter().any(|k| values.get(k).is_none()) {
            continue;
        }
        let clause = group
            .iter()
            .map(|k| format!("{} = ?", quote(k)))
            .collect::<Vec<_>>()
            .join(" AND ");
        clauses.push(format!("({})", clause));
        params.extend(group.iter().filter_map(|k| values.get(k)).map(to_sql_value));
    }
    if clauses.is_empty() {
        return Ok(false);
    }

    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE {})",
        quote(table),
        clauses.join(" OR ")
    );
    let exists: bool = session
        .conn()
        .query_row(&sql, rusqlite::params_from_iter(params.iter()), |r| r.get(0))?;
    Ok(exists)
}

/// Some, but not all, unique-key columns are set
fn partially_keyed(unique_keys: &[String], values: &Row) -> bool {
    let set = unique_keys.iter().filter(|k| values.contains_key(*k)).count();
    set > 0 && set < unique_keys.len()
}

/// Id of the row whose unique key matches, unset columns matching NULL
fn find_by_unique_keys(
    session: &Session<'_>,
    table: &str,
    pk: &str,
    unique_keys: &[String],
    values: &Row,
) -> Result<Option<i64>> {
    let clause = unique_keys
        .iter()
        .map(|k| format!("{} IS ?", quote(k)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let params: Vec<SqlValue> = unique_keys
        .iter()
        .map(|k| values.get(k).map(to_sql_value).unwrap_or(SqlValue::Null))
        .collect();
    let sql = format!("SELECT {} FROM {} WHERE {} LIMIT 1", quote(pk), quote(table), clause);

    let mut stmt = session.conn().prepare(&sql)?;
    let mut ids = stmt.query_map(rusqlite::params_from_iter(params.iter()), |r| r.get::<_, i64>(0))?;
    let id = ids.next().transpose()?;
    Ok(id)
}

fn id_from_unique_keys(
    session: &Session<'_>,
    table: &str,
    pk: &str,
    unique_keys: &[String],
    values: &Row,
) -> Result<i64> {
    if unique_keys.is_empty() {
        return Ok(0);
    }

    match find_by_unique_keys(session, table, pk, unique_keys, values)? {
        Some(id) => Ok(id),
        None => {
            let keys = unique_keys
                .iter()
                .map(|k| format!("{}={}", k, values.get(k).cloned().unwrap_or(Value::Null)))
                .collect::<Vec<_>>()
                .join(", ");
            Err(Error::NotFound {
                table: table.to_string(),
                keys,
            })
        }
    }
}
