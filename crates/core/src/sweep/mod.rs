//! Reconciliation sweep.
//!
//! The queue gives at-least-once delivery, but a message can still be lost
//! before it is written (enqueue failure after the job row) or a worker can
//! die holding a job in `running`. The sweep periodically finds such jobs in
//! the store and either re-enqueues them or fails them.

mod config;
mod runner;

pub use config::SweepConfig;
pub use runner::{ReconciliationSweep, SweepReport, STALE_RUNNING_DETAIL};
