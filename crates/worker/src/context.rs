//! Service wiring for the worker process

use std::sync::Arc;

use anyhow::Context as _;
use qrgen_common::CircuitBreakerRegistry;
use qrgen_core::{
    AuditLogger, AuditSink, BackgroundJobQueue, DataStore, JobStore, ProcessorRegistry,
    ResilientDataClient, WebhookOutbox, WebhookOutboxStore, WebhookRetryProcessor,
};
use qrgen_domain::{Config, DatabaseBackend, JobType};
use qrgen_infra::database::{
    DbManager, SqliteAuditRepository, SqliteDataStore, SqliteJobRepository,
    SqliteWebhookOutboxRepository,
};
use qrgen_infra::{HttpWebhookTransport, JobWorker, OutboxWorker};
use tracing::info;

struct Stores {
    jobs: Arc<dyn JobStore>,
    outbox: Arc<dyn WebhookOutboxStore>,
    audit: Arc<dyn AuditSink>,
    data: Option<Arc<dyn DataStore>>,
}

/// Everything the worker process runs, built once at startup.
pub struct WorkerContext {
    pub config: Config,
    pub breakers: CircuitBreakerRegistry,
    pub data: Option<ResilientDataClient>,
    pub jobs: Arc<BackgroundJobQueue>,
    pub outbox: Arc<WebhookOutbox>,
    pub processors: Arc<ProcessorRegistry>,
}

impl WorkerContext {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let stores = match config.database.backend {
            DatabaseBackend::Sqlite => sqlite_stores(&config)?,
            DatabaseBackend::Postgres => postgres_stores(&config).await?,
        };

        let breakers = CircuitBreakerRegistry::new();
        let data = stores
            .data
            .map(|store| ResilientDataClient::new(store, &breakers, &config.resilience))
            .transpose()
            .context("invalid resilience settings")?;

        let audit = AuditLogger::new(stores.audit);
        let transport = Arc::new(
            HttpWebhookTransport::from_config(&config.webhooks)
                .context("failed to build webhook transport")?,
        );
        let outbox = Arc::new(
            WebhookOutbox::new(stores.outbox, transport, &config.webhooks)
                .context("invalid webhook settings")?
                .with_audit(audit.clone()),
        );
        let jobs = Arc::new(BackgroundJobQueue::new(stores.jobs, &config.jobs).with_audit(audit));

        let processors = Arc::new(ProcessorRegistry::new().with(
            JobType::WebhookRetry,
            Arc::new(WebhookRetryProcessor::new(Arc::clone(&outbox))),
        ));

        Ok(Self { config, breakers, data, jobs, outbox, processors })
    }

    pub fn job_worker(&self) -> JobWorker {
        JobWorker::from_config(Arc::clone(&self.jobs), Arc::clone(&self.processors), &self.config.jobs)
    }

    pub fn outbox_worker(&self) -> OutboxWorker {
        OutboxWorker::from_config(Arc::clone(&self.outbox), &self.config.webhooks)
    }
}

fn sqlite_stores(config: &Config) -> anyhow::Result<Stores> {
    let db = Arc::new(DbManager::from_config(&config.database).context("failed to open SQLite")?);
    db.run_migrations().context("failed to migrate SQLite")?;
    info!(path = %db.path().display(), "SQLite ready");

    Ok(Stores {
        jobs: Arc::new(SqliteJobRepository::new(Arc::clone(&db))),
        outbox: Arc::new(SqliteWebhookOutboxRepository::new(Arc::clone(&db))),
        audit: Arc::new(SqliteAuditRepository::new(Arc::clone(&db))),
        data: Some(Arc::new(SqliteDataStore::new(db))),
    })
}

#[cfg(feature = "postgres")]
async fn postgres_stores(config: &Config) -> anyhow::Result<Stores> {
    use qrgen_infra::database::{
        PgAuditRepository, PgDatabase, PgJobRepository, PgWebhookOutboxRepository,
    };

    let url = config.database.url.as_deref().context("postgres backend needs database.url")?;
    let db = PgDatabase::connect(url).await.context("failed to connect to Postgres")?;
    db.run_migrations().await.context("failed to migrate Postgres")?;
    db.health_check().await.context("Postgres health check failed")?;
    info!("Postgres ready");

    Ok(Stores {
        jobs: Arc::new(PgJobRepository::new(db.clone())),
        outbox: Arc::new(PgWebhookOutboxRepository::new(db.clone())),
        audit: Arc::new(PgAuditRepository::new(db)),
        data: None,
    })
}

#[cfg(not(feature = "postgres"))]
async fn postgres_stores(_config: &Config) -> anyhow::Result<Stores> {
    anyhow::bail!("built without the `postgres` feature")
}
