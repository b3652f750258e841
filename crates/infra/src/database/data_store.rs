//! Generic table access over SQLite.
//!
//! Backs [`qrgen_core::ResilientDataClient`]. Table and column names are
//! validated as plain identifiers and quoted; every value is bound as a
//! parameter. JSON scalars map onto SQLite storage classes (booleans become
//! integers); arrays and objects are stored as JSON text and come back as
//! strings.

use std::sync::Arc;

use async_trait::async_trait;
use qrgen_core::{DataStore, Filter, Row};
use qrgen_domain::{QrGenError, Result as DomainResult};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};

use super::codec::{map_sql_error, with_connection};
use super::manager::DbManager;

const MAX_IDENTIFIER_LENGTH: usize = 64;

pub struct SqliteDataStore {
    db: Arc<DbManager>,
}

impl SqliteDataStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DataStore for SqliteDataStore {
    async fn select(&self, table: &str, filter: &Filter) -> DomainResult<Vec<Row>> {
        let table = quote_identifier(table)?;
        let (where_sql, bound) = where_clause(filter, 1)?;
        let sql = format!("SELECT * FROM {table}{where_sql}");
        with_connection(&self.db, move |conn| query_rows(conn, &sql, bound)).await
    }

    async fn insert(&self, table: &str, row: Row) -> DomainResult<Row> {
        let table = quote_identifier(table)?;
        let sql = if row.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES RETURNING *")
        } else {
            let columns = row.keys().map(|c| quote_identifier(c)).collect::<DomainResult<Vec<_>>>()?;
            let placeholders = (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>();
            format!(
                "INSERT INTO {table} ({}) VALUES ({}) RETURNING *",
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        let bound = row.into_iter().map(|(_, value)| to_sql_value(value)).collect();

        let mut inserted =
            with_connection(&self.db, move |conn| query_rows(conn, &sql, bound)).await?;
        inserted
            .pop()
            .ok_or_else(|| QrGenError::Database("insert returned no row".into()))
    }

    async fn update(&self, table: &str, changes: Row, filter: &Filter) -> DomainResult<Vec<Row>> {
        if changes.is_empty() {
            return Err(QrGenError::InvalidInput("update requires at least one column".into()));
        }

        let table = quote_identifier(table)?;
        let assignments = changes
            .keys()
            .enumerate()
            .map(|(i, column)| Ok(format!("{} = ?{}", quote_identifier(column)?, i + 1)))
            .collect::<DomainResult<Vec<_>>>()?;
        let (where_sql, filter_values) = where_clause(filter, changes.len() + 1)?;
        let sql = format!("UPDATE {table} SET {}{where_sql} RETURNING *", assignments.join(", "));

        let mut bound: Vec<SqlValue> =
            changes.into_iter().map(|(_, value)| to_sql_value(value)).collect();
        bound.extend(filter_values);

        with_connection(&self.db, move |conn| query_rows(conn, &sql, bound)).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> DomainResult<u64> {
        let table = quote_identifier(table)?;
        let (where_sql, bound) = where_clause(filter, 1)?;
        let sql = format!("DELETE FROM {table}{where_sql}");

        with_connection(&self.db, move |conn| {
            let removed = conn.execute(&sql, params_from_iter(bound)).map_err(map_sql_error)?;
            Ok(u64::try_from(removed).unwrap_or(u64::MAX))
        })
        .await
    }
}

fn quote_identifier(name: &str) -> DomainResult<String> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid = valid_start
        && name.len() <= MAX_IDENTIFIER_LENGTH
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(format!("\"{name}\""))
    } else {
        Err(QrGenError::InvalidInput(format!("invalid identifier: {name:?}")))
    }
}

/// `IS` so that a JSON `null` in the filter matches SQL `NULL`.
fn where_clause(filter: &Filter, first_index: usize) -> DomainResult<(String, Vec<SqlValue>)> {
    if filter.is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut conditions = Vec::with_capacity(filter.len());
    let mut bound = Vec::with_capacity(filter.len());
    for (offset, (column, value)) in filter.iter().enumerate() {
        conditions.push(format!("{} IS ?{}", quote_identifier(column)?, first_index + offset));
        bound.push(to_sql_value(value.clone()));
    }
    Ok((format!(" WHERE {}", conditions.join(" AND ")), bound))
}

fn query_rows(conn: &mut Connection, sql: &str, bound: Vec<SqlValue>) -> DomainResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql).map_err(map_sql_error)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();

    let mut rows = stmt.query(params_from_iter(bound)).map_err(map_sql_error)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_sql_error)? {
        let mut record = Map::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            let value = row.get_ref(idx).map_err(map_sql_error)?;
            record.insert(column.clone(), from_sql_value(value));
        }
        out.push(record);
    }
    Ok(out)
}

fn to_sql_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            (None, None) => SqlValue::Text(n.to_string()),
        },
        Value::String(s) => SqlValue::Text(s),
        other @ (Value::Array(_) | Value::Object(_)) => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn setup_store() -> (SqliteDataStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let manager =
            DbManager::new(temp_dir.path().join("data.db"), 2, std::time::Duration::from_secs(5))
                .unwrap();
        manager
            .get_connection()
            .unwrap()
            .execute_batch(
                "CREATE TABLE qr_codes (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    scans INTEGER NOT NULL DEFAULT 0,
                    archived INTEGER NOT NULL DEFAULT 0,
                    folder TEXT
                )",
            )
            .unwrap();
        (SqliteDataStore::new(Arc::new(manager)), temp_dir)
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn filter(pairs: &[(&str, Value)]) -> Filter {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_returns_stored_row_with_defaults() {
        let (store, _dir) = setup_store();

        let stored =
            store.insert("qr_codes", row(json!({"id": "qr-1", "name": "Menu"}))).await.unwrap();

        assert_eq!(
            Value::Object(stored),
            json!({"id": "qr-1", "name": "Menu", "scans": 0, "archived": 0, "folder": null})
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn select_update_delete_honor_filters() {
        let (store, _dir) = setup_store();
        for (id, folder) in [("qr-1", json!("menus")), ("qr-2", json!("menus")), ("qr-3", json!(null))] {
            store
                .insert("qr_codes", row(json!({"id": id, "name": id, "folder": folder})))
                .await
                .unwrap();
        }

        let menus = store.select("qr_codes", &filter(&[("folder", json!("menus"))])).await.unwrap();
        assert_eq!(menus.len(), 2);

        let unfiled = store.select("qr_codes", &filter(&[("folder", Value::Null)])).await.unwrap();
        assert_eq!(unfiled.len(), 1);
        assert_eq!(unfiled[0]["id"], json!("qr-3"));

        let updated = store
            .update(
                "qr_codes",
                row(json!({"scans": 7, "archived": true})),
                &filter(&[("id", json!("qr-2"))]),
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["scans"], json!(7));
        assert_eq!(updated[0]["archived"], json!(1));

        let removed = store.delete("qr_codes", &filter(&[("folder", json!("menus"))])).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.select("qr_codes", &Filter::new()).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_matching_nothing_returns_empty() {
        let (store, _dir) = setup_store();

        let updated = store
            .update("qr_codes", row(json!({"scans": 1})), &filter(&[("id", json!("missing"))]))
            .await
            .unwrap();
        assert!(updated.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_unsafe_identifiers() {
        let (store, _dir) = setup_store();

        let bad_table = store.select("qr_codes; DROP TABLE qr_codes", &Filter::new()).await;
        assert!(matches!(bad_table, Err(QrGenError::InvalidInput(_))));

        let bad_column = store
            .select("qr_codes", &filter(&[("name\" OR 1=1 --", json!("x"))]))
            .await;
        assert!(matches!(bad_column, Err(QrGenError::InvalidInput(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_key_is_invalid_input() {
        let (store, _dir) = setup_store();
        store.insert("qr_codes", row(json!({"id": "qr-1", "name": "a"}))).await.unwrap();

        let err = store.insert("qr_codes", row(json!({"id": "qr-1", "name": "b"}))).await;
        assert!(matches!(err, Err(QrGenError::InvalidInput(_))));
    }
}
