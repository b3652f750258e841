use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qrgen_domain::Result as DomainResult;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// One unit of periodic work.
#[async_trait]
pub trait WorkerTask: Send + Sync + 'static {
    type Report: Debug + Send;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Run one tick. Check `budget` before starting each new piece of work;
    /// work already started must be carried to a recorded outcome.
    async fn run_once(&self, budget: &TickBudget) -> DomainResult<Self::Report>;
}

/// Time and cancellation budget handed to a tick.
///
/// The tick is never interrupted from outside. It stops taking new work once
/// the deadline passes or the worker is being stopped.
#[derive(Debug, Clone)]
pub struct TickBudget {
    deadline: Instant,
    cancel: CancellationToken,
}

impl TickBudget {
    pub fn new(limit: Duration, cancel: CancellationToken) -> Self {
        Self { deadline: Instant::now() + limit, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_exhausted(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Whether another job or batch may be started
    pub fn allows_more(&self) -> bool {
        !self.is_cancelled() && !self.is_exhausted()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Interval between ticks
    pub poll_interval: Duration,
    /// Time after which a tick stops claiming new work
    pub tick_budget: Duration,
    /// How long `stop` waits before warning about an in-flight tick
    pub stop_warn_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            tick_budget: Duration::from_secs(300),
            stop_warn_after: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker already running")]
    AlreadyRunning,
    #[error("worker not running")]
    NotRunning,
    #[error("worker task panicked")]
    Panicked,
}

/// Runs a [`WorkerTask`] on an interval until stopped.
pub struct PeriodicWorker<T: WorkerTask> {
    task: Arc<T>,
    config: WorkerConfig,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl<T: WorkerTask> PeriodicWorker<T> {
    pub fn new(task: T, config: WorkerConfig) -> Self {
        Self {
            task: Arc::new(task),
            config,
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Spawn the background loop.
    #[instrument(skip(self), fields(worker = self.task.name()))]
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();

        let task = Arc::clone(&self.task);
        let config = self.config.clone();
        let cancel = self.cancellation.clone();

        self.task_handle = Some(tokio::spawn(async move {
            Self::process_loop(task, config, cancel).await;
        }));

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Worker started"
        );
        Ok(())
    }

    /// Cancel the loop and wait for it to finish.
    ///
    /// A tick in progress finishes the job or batch it has claimed and then
    /// returns; `stop` waits for it and warns if that takes longer than
    /// `stop_warn_after`.
    #[instrument(skip(self), fields(worker = self.task.name()))]
    pub async fn stop(&mut self) -> Result<(), WorkerError> {
        let Some(mut handle) = self.task_handle.take() else {
            return Err(WorkerError::NotRunning);
        };

        self.cancellation.cancel();

        let joined = match tokio::time::timeout(self.config.stop_warn_after, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    waited_ms = self.config.stop_warn_after.as_millis() as u64,
                    "Worker still finishing in-flight work"
                );
                handle.await
            }
        };

        self.cancellation = CancellationToken::new();
        match joined {
            Ok(()) => {
                info!("Worker stopped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Worker task panicked");
                Err(WorkerError::Panicked)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Run a single tick now, outside the loop.
    pub async fn run_once(&self) -> DomainResult<T::Report> {
        Self::tick(&self.task, self.config.tick_budget, self.cancellation.child_token()).await
    }

    async fn tick(
        task: &Arc<T>,
        limit: Duration,
        cancel: CancellationToken,
    ) -> DomainResult<T::Report> {
        let started = Instant::now();
        let budget = TickBudget::new(limit, cancel);
        let result = task.run_once(&budget).await;

        let elapsed = started.elapsed();
        if elapsed > limit {
            warn!(
                worker = task.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = limit.as_millis() as u64,
                "Worker tick overran its budget"
            );
        }
        result
    }

    async fn process_loop(task: Arc<T>, config: WorkerConfig, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(worker = task.name(), "Worker loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(config.poll_interval) => {
                    let started = Instant::now();
                    match Self::tick(&task, config.tick_budget, cancel.clone()).await {
                        Ok(report) => debug!(
                            worker = task.name(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            report = ?report,
                            "Worker tick finished"
                        ),
                        Err(e) => error!(worker = task.name(), error = %e, "Worker tick failed"),
                    }
                }
            }
        }
    }
}

impl<T: WorkerTask> Drop for PeriodicWorker<T> {
    fn drop(&mut self) {
        if self.is_running() {
            self.cancellation.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Runs up to `units` steps per tick, each taking `unit`, checking the
    /// budget before every step.
    struct StepTask {
        units: u32,
        unit: Duration,
        started: AtomicU32,
        finished: AtomicU32,
    }

    #[async_trait]
    impl WorkerTask for StepTask {
        type Report = u32;

        fn name(&self) -> &'static str {
            "steps"
        }

        async fn run_once(&self, budget: &TickBudget) -> DomainResult<u32> {
            let mut done = 0;
            while done < self.units && budget.allows_more() {
                self.started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.unit).await;
                self.finished.fetch_add(1, Ordering::SeqCst);
                done += 1;
            }
            Ok(done)
        }
    }

    fn worker(units: u32, unit: Duration) -> PeriodicWorker<StepTask> {
        PeriodicWorker::new(
            StepTask { units, unit, started: AtomicU32::new(0), finished: AtomicU32::new(0) },
            WorkerConfig {
                poll_interval: Duration::from_secs(1),
                tick_budget: Duration::from_secs(2),
                stop_warn_after: Duration::from_secs(1),
            },
        )
    }

    fn counts(worker: &PeriodicWorker<StepTask>) -> (u32, u32) {
        let task = worker.task();
        (task.started.load(Ordering::SeqCst), task.finished.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_until_stopped() {
        let mut worker = worker(1, Duration::ZERO);
        worker.start().unwrap();
        assert!(worker.is_running());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        worker.stop().await.unwrap();

        assert!(!worker.is_running());
        assert_eq!(counts(&worker), (3, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_rejected_and_stop_requires_running() {
        let mut worker = worker(1, Duration::ZERO);
        assert_eq!(worker.stop().await, Err(WorkerError::NotRunning));

        worker.start().unwrap();
        assert_eq!(worker.start(), Err(WorkerError::AlreadyRunning));
        worker.stop().await.unwrap();

        worker.start().unwrap();
        worker.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_stops_new_work_without_cutting_a_step_short() {
        let worker = worker(10, Duration::from_millis(1_500));

        // Steps start at 0s and 1.5s; the 2s budget is spent before a third.
        let done = worker.run_once().await.unwrap();

        assert_eq!(done, 2);
        assert_eq!(counts(&worker), (2, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_the_step_in_flight() {
        let mut worker = worker(10, Duration::from_secs(5));
        worker.start().unwrap();

        // First tick begins at 1s; its first step runs until 6s.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(counts(&worker), (1, 0));

        worker.stop().await.unwrap();

        assert!(!worker.is_running());
        assert_eq!(counts(&worker), (1, 1), "no new step after stop, the running one finishes");
    }

    #[tokio::test(start_paused = true)]
    async fn run_once_returns_report() {
        let worker = worker(1, Duration::ZERO);
        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert_eq!(counts(&worker), (2, 2));
    }
}
