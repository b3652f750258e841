//! Shared tokio-postgres client with optional TLS

use std::sync::Arc;

use postgres_native_tls::MakeTlsConnector;
use qrgen_domain::{QrGenError, Result};
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{error, info};

use crate::errors::InfraError;

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// One multiplexed connection; statements from many tasks are pipelined.
#[derive(Clone)]
pub struct PgDatabase {
    client: Arc<Client>,
}

impl PgDatabase {
    /// Connect using a libpq-style URL.
    ///
    /// TLS is negotiated unless the URL says `sslmode=disable`.
    pub async fn connect(url: &str) -> Result<Self> {
        let config: Config = url
            .parse()
            .map_err(|e| QrGenError::Config(format!("invalid postgres url: {e}")))?;

        let client = if matches!(config.get_ssl_mode(), SslMode::Disable) {
            let (client, connection) = config.connect(NoTls).await.map_err(map_pg_error)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!(error = %e, "postgres connection terminated");
                }
            });
            client
        } else {
            let connector = native_tls::TlsConnector::builder()
                .build()
                .map_err(|e| QrGenError::Config(format!("failed to build TLS connector: {e}")))?;
            let (client, connection) = config
                .connect(MakeTlsConnector::new(connector))
                .await
                .map_err(map_pg_error)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!(error = %e, "postgres connection terminated");
                }
            });
            client
        };

        info!(hosts = config.get_hosts().len(), "postgres client connected");
        Ok(Self { client: Arc::new(client) })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn run_migrations(&self) -> Result<()> {
        self.client.batch_execute(SCHEMA_SQL).await.map_err(map_pg_error)?;
        self.client
            .execute(
                "INSERT INTO schema_version (version) VALUES ($1) ON CONFLICT DO NOTHING",
                &[&SCHEMA_VERSION],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        self.client.query_one("SELECT 1", &[]).await.map_err(map_pg_error)?;
        Ok(())
    }
}

impl std::fmt::Debug for PgDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDatabase").field("closed", &self.client.is_closed()).finish()
    }
}

pub(crate) fn map_pg_error(err: tokio_postgres::Error) -> QrGenError {
    QrGenError::from(InfraError::from(err))
}

pub(crate) fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub(crate) fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
