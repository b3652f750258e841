//! SQLite connection manager backed by an r2d2 pool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use qrgen_domain::{DatabaseConfig, QrGenError, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::{info, warn};

use super::codec::{map_sql_error, now_millis};
use crate::errors::InfraError;

pub type SqlitePool = Pool<SqliteConnectionManager>;
pub type SqliteConnection = PooledConnection<SqliteConnectionManager>;

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode=WAL;
PRAGMA wal_autocheckpoint=1000;
PRAGMA synchronous=NORMAL;
PRAGMA foreign_keys=ON;";

/// Owns the connection pool for one SQLite database file.
pub struct DbManager {
    pool: SqlitePool,
    path: PathBuf,
}

impl DbManager {
    /// Open (or create) the database at `db_path`.
    ///
    /// Every pooled connection runs in WAL mode and waits up to
    /// `busy_timeout` for a competing writer before reporting `SQLITE_BUSY`.
    pub fn new<P: AsRef<Path>>(db_path: P, pool_size: u32, busy_timeout: Duration) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();

        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.execute_batch(CONNECTION_PRAGMAS)?;
            conn.busy_timeout(busy_timeout)?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(CONNECTION_TIMEOUT)
            .build(manager)
            .map_err(|e| {
                warn!(db_path = %path.display(), error = %e, "failed to create sqlite pool");
                QrGenError::from(InfraError::from(e))
            })?;

        info!(
            db_path = %path.display(),
            max_connections = pool.max_size(),
            "sqlite pool initialised"
        );

        Ok(Self { pool, path })
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::new(
            &config.path,
            config.pool_size,
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire a connection from the pool.
    pub fn get_connection(&self) -> Result<SqliteConnection> {
        self.pool.get().map_err(|e| InfraError::from(e).into())
    }

    /// Ensure the full schema exists on the current database.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(SCHEMA_SQL).map_err(map_sql_error)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![SCHEMA_VERSION, now_millis()],
        )
        .map_err(map_sql_error)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verify the database answers a trivial query.
    pub fn health_check(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0)).map_err(map_sql_error)?;
        Ok(())
    }
}

impl std::fmt::Debug for DbManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbManager").field("path", &self.path).finish_non_exhaustive()
    }
}
