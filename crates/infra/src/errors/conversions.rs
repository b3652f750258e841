//! Conversions from driver and client errors into the domain error.
//!
//! Foreign error types cannot implement `From` for `QrGenError` directly, so
//! they go through the [`InfraError`] newtype:
//!
//! ```ignore
//! let err: QrGenError = InfraError::from(sql_err).into();
//! ```

use qrgen_domain::QrGenError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

#[derive(Debug)]
pub struct InfraError(pub QrGenError);

impl From<InfraError> for QrGenError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<QrGenError> for InfraError {
    fn from(value: QrGenError) -> Self {
        InfraError(value)
    }
}

trait IntoQrGenError {
    fn into_qrgen(self) -> QrGenError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → QrGenError */
/* -------------------------------------------------------------------------- */

impl IntoQrGenError for SqlError {
    fn into_qrgen(self) -> QrGenError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => QrGenError::Database("database is busy".into()),
                    (ErrorCode::DatabaseLocked, _) => {
                        QrGenError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 2067 | 1555) => {
                        QrGenError::InvalidInput(format!("unique constraint violation: {message}"))
                    }
                    (ErrorCode::ConstraintViolation, 275) => {
                        QrGenError::InvalidInput(format!("check constraint violation: {message}"))
                    }
                    _ => QrGenError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => QrGenError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                QrGenError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                QrGenError::Database(format!("invalid column type for {name}: {ty}"))
            }
            RE::InvalidColumnName(name) => {
                QrGenError::InvalidInput(format!("unknown column: {name}"))
            }
            RE::Utf8Error(_) => QrGenError::Database("invalid UTF-8 returned from sqlite".into()),
            RE::InvalidPath(path) => QrGenError::Config(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => QrGenError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_qrgen())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → QrGenError */
/* -------------------------------------------------------------------------- */

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(QrGenError::Database(format!("connection pool: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → QrGenError */
/* -------------------------------------------------------------------------- */

impl IntoQrGenError for HttpError {
    fn into_qrgen(self) -> QrGenError {
        if self.is_timeout() {
            return QrGenError::Timeout("HTTP request timed out".into());
        }

        if self.is_connect() {
            return QrGenError::Network(format!("HTTP connection failure: {self}"));
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                404 => QrGenError::NotFound(message),
                400..=499 if code != 408 && code != 429 => QrGenError::InvalidInput(message),
                _ => QrGenError::Network(message),
            };
        }

        if self.is_builder() {
            return QrGenError::InvalidInput(format!("invalid HTTP request: {self}"));
        }

        QrGenError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_qrgen())
    }
}

/* -------------------------------------------------------------------------- */
/* tokio_postgres::Error → QrGenError */
/* -------------------------------------------------------------------------- */

#[cfg(feature = "postgres")]
impl IntoQrGenError for tokio_postgres::Error {
    fn into_qrgen(self) -> QrGenError {
        use tokio_postgres::error::SqlState;

        if let Some(db_error) = self.as_db_error() {
            let code = db_error.code();
            let message = db_error.message().to_string();
            return if *code == SqlState::UNIQUE_VIOLATION || *code == SqlState::CHECK_VIOLATION {
                QrGenError::InvalidInput(message)
            } else if *code == SqlState::UNDEFINED_COLUMN || *code == SqlState::UNDEFINED_TABLE {
                QrGenError::InvalidInput(message)
            } else if *code == SqlState::QUERY_CANCELED {
                QrGenError::Timeout(message)
            } else {
                QrGenError::Database(format!("postgres error {}: {message}", code.code()))
            };
        }

        if self.is_closed() {
            return QrGenError::Network("postgres connection closed".into());
        }

        QrGenError::Database(self.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for InfraError {
    fn from(value: tokio_postgres::Error) -> Self {
        InfraError(value.into_qrgen())
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
