//! Periodic background workers with explicit lifecycle management.
//!
//! Each worker owns its join handle and cancellation token, polls on a fixed
//! interval and hands every tick a [`TickBudget`]. Ticks are never cut short:
//! a claimed job or batch always reaches a recorded outcome, and claims left
//! behind by a crashed process are released by the next tick. Call
//! [`PeriodicWorker::stop`] before dropping; dropping a running worker only
//! cancels it.

pub mod job_worker;
pub mod outbox_worker;
pub mod periodic;

pub use job_worker::{JobDrainTask, JobWorker};
pub use outbox_worker::{OutboxDeliveryTask, OutboxWorker};
pub use periodic::{PeriodicWorker, TickBudget, WorkerConfig, WorkerError, WorkerTask};
