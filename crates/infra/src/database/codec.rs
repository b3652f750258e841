//! Column conversions shared by the SQLite repositories

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use qrgen_domain::QrGenError;
use rusqlite::types::Type;
use rusqlite::Row;
use serde_json::Value;
use tokio::task;
use tracing::warn;

use super::manager::DbManager;
use crate::errors::InfraError;

/// Run `f` on a pooled connection inside the blocking thread pool.
pub(crate) async fn with_connection<T, F>(db: &Arc<DbManager>, f: F) -> Result<T, QrGenError>
where
    T: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection) -> Result<T, QrGenError> + Send + 'static,
{
    let db = Arc::clone(db);
    task::spawn_blocking(move || -> Result<T, QrGenError> {
        let mut conn = db.get_connection()?;
        f(&mut conn)
    })
    .await
    .map_err(map_join_error)?
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn now_millis() -> i64 {
    to_millis(Utc::now())
}

pub(crate) fn millis_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {millis}").into(),
        )
    })
}

pub(crate) fn optional_millis_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => millis_column(row, idx).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn optional_json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => json_column(row, idx).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn json_text(value: &Value) -> String {
    value.to_string()
}

/// Parse a status column, falling back to `default` for unknown values.
pub(crate) fn parse_status<S>(table: &str, id: &str, raw: &str, default: S) -> S
where
    S: FromStr<Err = String>,
{
    match raw.parse::<S>() {
        Ok(status) => status,
        Err(err) => {
            warn!(
                table,
                row_id = %id,
                raw_status = %raw,
                error = %err,
                "invalid status stored in database, using default"
            );
            default
        }
    }
}

pub(crate) fn map_sql_error(err: rusqlite::Error) -> QrGenError {
    QrGenError::from(InfraError::from(err))
}

pub(crate) fn map_join_error(err: task::JoinError) -> QrGenError {
    if err.is_cancelled() {
        QrGenError::Internal("database task cancelled".into())
    } else {
        QrGenError::Internal(format!("database task panic: {err}"))
    }
}

pub(crate) fn usize_to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
