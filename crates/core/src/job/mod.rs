//! Job records, the lifecycle state machine and durable storage.

mod sqlite_store;
mod store;
mod types;

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};

pub use sqlite_store::SqliteJobStore;
pub(crate) use sqlite_store::format_ts;
pub use store::{JobError, JobFilter, JobStore, UpdateOutcome};
pub use types::{ArtifactRef, Job, JobStatus, Parameters, Transition};

/// Current time at the precision the store persists (microseconds).
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Convert a std duration for timestamp arithmetic, saturating at ten years.
pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(3650))
}
