//! Generic row reader and filtered delete
//!
//! Rows travel as attribute mappings (column name to JSON value); typing them is the
//! entity layer's job. A joined select labels every column `<table>_<column>` and keeps
//! base rows without a partner (their joined columns are null).

use std::collections::HashMap;

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;

use super::sqlite::Session;
use super::Row;
use crate::{Error, Result};

/// Ordered AND-of-equalities; an array value becomes an `IN` list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(Vec<(String, Value)>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality (builder style)
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    /// Add an equality, replacing an earlier one on the same column
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.0.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filters = Filters::new();
        for (k, v) in iter {
            filters.push(k, v);
        }
        filters
    }
}

/// A select against one table, optionally joined with one more
#[derive(Debug, Clone, Default)]
pub struct Select {
    pub table: String,
    pub filters: Filters,
    pub join: Option<String>,
    pub order_by: Vec<String>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn join(mut self, table: impl Into<String>) -> Self {
        self.join = Some(table.into());
        self
    }

    pub fn order_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_by = columns.into_iter().map(Into::into).collect();
        self
    }
}

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// JSON to SQL: lists joined with "; ", objects as JSON text, booleans as 0/1
pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(items) => SqlValue::Text(join_list(items)),
        Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Join list items with "; " (strings verbatim, anything else as JSON)
pub(crate) fn join_list(items: &[Value]) -> String {
    items
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub(crate) fn from_sql_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Build `WHERE` text and parameters; `resolve` maps a filter key to a qualified column.
fn where_clause(
    table: &str,
    filters: &Filters,
    resolve: impl Fn(&str) -> Option<String>,
) -> Result<(String, Vec<SqlValue>)> {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    for (key, value) in filters.iter() {
        let column = resolve(key).ok_or_else(|| Error::UnknownColumn {
            table: table.to_string(),
            column: key.to_string(),
        })?;
        match value {
            Value::Array(items) if items.is_empty() => clauses.push("0".to_string()),
            Value::Array(items) => {
                let marks = vec!["?"; items.len()].join(", ");
                clauses.push(format!("{} IN ({})", column, marks));
                params.extend(items.iter().map(to_sql_value));
            }
            Value::Null => clauses.push(format!("{} IS NULL", column)),
            other => {
                clauses.push(format!("{} = ?", column));
                params.push(to_sql_value(other));
            }
        }
    }

    if clauses.is_empty() {
        Ok((String::new(), params))
    } else {
        Ok((format!(" WHERE {}", clauses.join(" AND ")), params))
    }
}

/// Select rows as attribute mappings
pub fn select_where(session: &Session<'_>, select: &Select) -> Result<Vec<Row>> {
    let conn = session.conn();
    let catalog = session.catalog();
    let base = select.table.as_str();

    // label -> qualified column, in output order
    let mut labels: Vec<(String, String)> = Vec::new();
    let mut from = quote(base);

    match &select.join {
        None => {
            for column in catalog.column_names(conn, base)? {
                labels.push((column.clone(), format!("{}.{}", quote(base), quote(&column))));
            }
        }
        Some(joined) => {
            for table in [base, joined.as_str()] {
                for column in catalog.column_names(conn, table)? {
                    labels.push((
                        format!("{}_{}", table, column),
                        format!("{}.{}", quote(table), quote(&column)),
                    ));
                }
            }
            let on = catalog
                .join_columns(conn, base, joined)?
                .into_iter()
                .map(|(left, right)| {
                    format!("{}.{} = {}.{}", quote(base), quote(&left), quote(joined), quote(&right))
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            from = format!("{} LEFT JOIN {} ON {}", from, quote(joined), on);
        }
    }

    let lookup: HashMap<&str, &str> = labels
        .iter()
        .map(|(label, column)| (label.as_str(), column.as_str()))
        .collect();
    let (where_sql, params) = where_clause(base, &select.filters, |key| {
        lookup.get(key).map(|c| c.to_string())
    })?;

    // unknown order columns are ignored
    let order: Vec<&str> = select
        .order_by
        .iter()
        .filter_map(|col| lookup.get(col.as_str()).copied())
        .collect();
    let order_sql = if order.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", order.join(", "))
    };

    let columns_sql = labels
        .iter()
        .map(|(_, column)| column.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {} FROM {}{}{}", columns_sql, from, where_sql, order_sql);
    tracing::debug!("select: {} {:?}", sql, params);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let mut out = Row::new();
            for (idx, (label, _)) in labels.iter().enumerate() {
                out.insert(label.clone(), from_sql_ref(row.get_ref(idx)?));
            }
            Ok(out)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

/// Delete matching rows inside a transaction and return how many went
pub fn delete_where(session: &Session<'_>, table: &str, filters: &Filters) -> Result<usize> {
    if filters.is_empty() {
        return Err(Error::Validation(format!(
            "refusing to delete from {} without filters",
            table
        )));
    }

    let columns = session.catalog().column_names(session.conn(), table)?;
    let (where_sql, params) = where_clause(table, filters, |key| {
        columns.iter().any(|c| c == key).then(|| quote(key))
    })?;
    let sql = format!("DELETE FROM {}{}", quote(table), where_sql);
    tracing::debug!("delete: {} {:?}", sql, params);

    let deleted = session.write_once(table, |conn| {
        Ok(conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?)
    })?;
    tracing::debug!("Deleted {} rows from {}", deleted, table);
    Ok(deleted)
}

/// Null out `column` on every row of `table` that points at `value`
pub fn detach(session: &Session<'_>, table: &str, column: &str, value: &Value) -> Result<usize> {
    if !session.catalog().has_column(session.conn(), table, column)? {
        return Err(Error::UnknownColumn {
            table: table.to_string(),
            column: column.to_string(),
        });
    }
    let sql = format!(
        "UPDATE {} SET {} = NULL WHERE {} = ?1",
        quote(table),
        quote(column),
        quote(column)
    );
    let param = to_sql_value(value);
    let detached = session.write_once(table, |conn| Ok(conn.execute(&sql, [&param])?))?;
    tracing::debug!("Detached {} rows of {} from {} = {}", detached, table, column, value);
    Ok(detached)
}

/// Clear `is_latest` on every row of `table` sharing `scope_column = value`.
///
/// Runs as its own statement ahead of the row upsert, not atomically with it: two
/// concurrent writers can briefly leave zero or two latest rows.
pub fn clear_latest(session: &Session<'_>, table: &str, scope_column: &str, value: &Value) -> Result<usize> {
    if !session.catalog().has_column(session.conn(), table, scope_column)? {
        return Err(Error::UnknownColumn {
            table: table.to_string(),
            column: scope_column.to_string(),
        });
    }
    let sql = format!(
        "UPDATE {} SET \"is_latest\" = 0 WHERE {} = ?1",
        quote(table),
        quote(scope_column)
    );
    let param = to_sql_value(value);
    session.write(table, |conn| Ok(conn.execute(&sql, [&param])?))
}
