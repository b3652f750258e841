//! Background job queue over a real SQLite database

#![allow(dead_code)]

#[path = "support.rs"]
mod support;

use std::sync::Arc;

use async_trait::async_trait;
use qrgen_core::{AuditLogger, BackgroundJobQueue, JobProcessor, JobStore, ProcessorRegistry};
use qrgen_domain::{
    JobOptions, JobStatus, JobType, JobsConfig, QrGenError, Result as DomainResult,
};
use qrgen_infra::database::{SqliteAuditRepository, SqliteJobRepository};
use serde_json::{json, Value};
use support::TestDatabase;

struct AlwaysFails;

#[async_trait]
impl JobProcessor for AlwaysFails {
    async fn process(&self, _payload: &Value) -> DomainResult<Value> {
        Err(QrGenError::Internal("renderer crashed".into()))
    }
}

fn immediate_retry_config() -> JobsConfig {
    JobsConfig { retry_backoff_ms: 0, ..JobsConfig::default() }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_have_exactly_one_winner() {
    let db = TestDatabase::new();
    let first = SqliteJobRepository::new(Arc::clone(&db.manager));
    let second = SqliteJobRepository::new(Arc::clone(&db.manager));

    let queue = BackgroundJobQueue::new(Arc::new(SqliteJobRepository::new(Arc::clone(&db.manager))), &JobsConfig::default());
    let job = queue.create_job(JobType::QrExport, json!({}), JobOptions::default()).await.unwrap();

    for _ in 0..20 {
        let now = chrono::Utc::now();
        let (a, b) = tokio::join!(first.claim_next_job(now), second.claim_next_job(now));
        let winners: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();

        assert!(winners.len() <= 1, "both claims won: {winners:?}");
        if let Some(winner) = winners.first() {
            assert_eq!(winner.id, job.id);
            assert_eq!(winner.status, JobStatus::Processing);
            // Put it back for the next round
            db.execute_batch(&format!(
                "UPDATE background_jobs SET status = 'pending' WHERE id = '{}'",
                job.id
            ));
        } else {
            panic!("neither claim won");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_workers_claim_each_job_once() {
    let db = TestDatabase::new();
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobRepository::new(Arc::clone(&db.manager)));
    let queue = BackgroundJobQueue::new(Arc::clone(&store), &JobsConfig::default());
    for n in 0..12 {
        queue.create_job(JobType::BulkQrCreate, json!({"n": n}), JobOptions::default()).await.unwrap();
    }

    let workers = (0..4).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = store.claim_next_job(chrono::Utc::now()).await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        })
    });

    let mut all: Vec<String> = Vec::new();
    for worker in workers {
        all.extend(worker.await.unwrap());
    }
    all.sort();
    let before = all.len();
    all.dedup();

    assert_eq!(before, 12);
    assert_eq!(all.len(), 12);
    assert_eq!(db.count("SELECT COUNT(*) FROM background_jobs WHERE status = 'processing'"), 12);
}

#[tokio::test(flavor = "multi_thread")]
async fn job_with_two_retries_fails_terminally_on_third_failure() {
    let db = TestDatabase::new();
    let audit = Arc::new(SqliteAuditRepository::new(Arc::clone(&db.manager)));
    let queue = BackgroundJobQueue::new(
        Arc::new(SqliteJobRepository::new(Arc::clone(&db.manager))),
        &immediate_retry_config(),
    )
    .with_audit(AuditLogger::new(audit));

    let job = queue
        .create_job(
            JobType::ImageOptimization,
            json!({"image": "logo.png"}),
            JobOptions { max_retries: 2, ..JobOptions::default() },
        )
        .await
        .unwrap();

    let mut last = None;
    for _ in 0..3 {
        let claimed = queue.claim_next_job().await.unwrap().expect("job should be due");
        assert_eq!(claimed.id, job.id);
        last = Some(queue.fail_job(&claimed.id, "renderer crashed").await.unwrap());
    }

    let last = last.unwrap();
    assert_eq!(last.status, JobStatus::Failed);
    assert_eq!(last.retries, 2);
    assert_eq!(last.error.as_deref(), Some("renderer crashed"));
    assert!(queue.claim_next_job().await.unwrap().is_none());
    assert_eq!(
        db.count("SELECT COUNT(*) FROM audit_log WHERE action = 'job.failed' AND success = 0"),
        1
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_runs_processors_and_records_failures() {
    let db = TestDatabase::new();
    let queue = BackgroundJobQueue::new(
        Arc::new(SqliteJobRepository::new(Arc::clone(&db.manager))),
        &JobsConfig::default(),
    );
    let registry = ProcessorRegistry::new().with(JobType::QrExport, Arc::new(AlwaysFails));

    let job = queue
        .create_job(
            JobType::QrExport,
            json!({"format": "svg"}),
            JobOptions { max_retries: 0, ..JobOptions::default() },
        )
        .await
        .unwrap();

    let report = queue.drain(&registry, 10).await.unwrap();
    assert_eq!(report.failed, vec![job.id.clone()]);
    assert!(report.completed.is_empty());

    let stored = queue.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.retries, 0);
    assert!(stored.error.unwrap().contains("renderer crashed"));
}
