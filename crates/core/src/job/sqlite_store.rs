//! SQLite-backed job store implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{now, Job, JobError, JobFilter, JobStatus, JobStore, Parameters, Transition, UpdateOutcome};

const JOB_COLUMNS: &str = "id, status, prompt, parameters, model, attempt_count, max_attempts, \
     result_locator, result_content_type, result_size_bytes, error_detail, progress, \
     created_at, updated_at, started_at, finished_at, scheduled_at";

/// Format a timestamp so that lexical order equals chronological order.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn db_err(e: rusqlite::Error) -> JobError {
    JobError::Database(e.to_string())
}

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and the `jobs` table.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                prompt TEXT NOT NULL,
                parameters TEXT NOT NULL,
                model TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                result_locator TEXT,
                result_content_type TEXT,
                result_size_bytes INTEGER,
                error_detail TEXT,
                progress INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                scheduled_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC, id DESC);
            CREATE INDEX IF NOT EXISTS idx_jobs_status_scheduled ON jobs(status, scheduled_at);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|_| JobError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }
        if let Some(ref at) = filter.created_at_or_before {
            conditions.push("created_at <= ?");
            params.push(Box::new(format_ts(at)));
        }
        if let Some(ref at) = filter.scheduled_before {
            conditions.push("scheduled_at < ?");
            params.push(Box::new(format_ts(at)));
        }
        if let Some(ref at) = filter.updated_before {
            conditions.push("updated_at < ?");
            params.push(Box::new(format_ts(at)));
        }
        if let Some(ref at) = filter.started_before {
            conditions.push("started_at IS NOT NULL AND started_at < ?");
            params.push(Box::new(format_ts(at)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let status_str: String = row.get(1)?;
        let status = status_str.parse::<JobStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into())
        })?;

        let parameters_json: String = row.get(3)?;
        let parameters: Parameters = serde_json::from_str(&parameters_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

        let result_size_bytes: Option<i64> = row.get(9)?;
        let progress: i64 = row.get(11)?;

        let created_at: String = row.get(12)?;
        let updated_at: String = row.get(13)?;
        let started_at: Option<String> = row.get(14)?;
        let finished_at: Option<String> = row.get(15)?;
        let scheduled_at: String = row.get(16)?;

        Ok(Job {
            id: row.get(0)?,
            status,
            prompt: row.get(2)?,
            parameters,
            model: row.get(4)?,
            attempt_count: row.get(5)?,
            max_attempts: row.get(6)?,
            result_locator: row.get(7)?,
            result_content_type: row.get(8)?,
            result_size_bytes: result_size_bytes.map(|v| v.max(0) as u64),
            error_detail: row.get(10)?,
            progress: progress.clamp(0, 100) as u8,
            created_at: parse_ts(12, &created_at)?,
            updated_at: parse_ts(13, &updated_at)?,
            started_at: started_at.as_deref().map(|s| parse_ts(14, s)).transpose()?,
            finished_at: finished_at.as_deref().map(|s| parse_ts(15, s)).transpose()?,
            scheduled_at: parse_ts(16, &scheduled_at)?,
        })
    }

    fn select_job(conn: &Connection, id: &str) -> Result<Option<Job>, JobError> {
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        )
        .optional()
        .map_err(db_err)
    }

    /// Execute the guarded UPDATE for `transition`. Returns the number of rows written.
    fn apply_transition(
        conn: &Connection,
        id: &str,
        expected: JobStatus,
        transition: &Transition,
    ) -> rusqlite::Result<usize> {
        let now = format_ts(&now());
        let target = transition.target().as_str();

        match transition {
            Transition::Start => conn.execute(
                "UPDATE jobs SET status = ?1, attempt_count = attempt_count + 1, \
                 started_at = COALESCE(started_at, ?2), updated_at = ?2 \
                 WHERE id = ?3 AND status = ?4 AND attempt_count <= max_attempts",
                params![target, now, id, expected.as_str()],
            ),
            Transition::Complete { artifact } => conn.execute(
                "UPDATE jobs SET status = ?1, result_locator = ?2, result_content_type = ?3, \
                 result_size_bytes = ?4, error_detail = NULL, progress = 100, \
                 finished_at = ?5, updated_at = ?5 \
                 WHERE id = ?6 AND status = ?7",
                params![
                    target,
                    artifact.locator,
                    artifact.content_type,
                    artifact.size_bytes as i64,
                    now,
                    id,
                    expected.as_str()
                ],
            ),
            Transition::Requeue { scheduled_at } => conn.execute(
                "UPDATE jobs SET status = ?1, scheduled_at = ?2, updated_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![target, format_ts(scheduled_at), now, id, expected.as_str()],
            ),
            Transition::Fail { error_detail } => conn.execute(
                "UPDATE jobs SET status = ?1, error_detail = ?2, result_locator = NULL, \
                 finished_at = ?3, updated_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![target, error_detail, now, id, expected.as_str()],
            ),
            Transition::Cancel => conn.execute(
                "UPDATE jobs SET status = ?1, finished_at = ?2, updated_at = ?2 \
                 WHERE id = ?3 AND status = ?4",
                params![target, now, id, expected.as_str()],
            ),
            Transition::Reset { scheduled_at } => conn.execute(
                "UPDATE jobs SET status = ?1, attempt_count = 0, error_detail = NULL, \
                 progress = 0, started_at = NULL, finished_at = NULL, \
                 scheduled_at = ?2, updated_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![target, format_ts(scheduled_at), now, id, expected.as_str()],
            ),
        }
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, job: &Job) -> Result<(), JobError> {
        let conn = self.lock()?;

        let parameters_json =
            serde_json::to_string(&job.parameters).map_err(|e| JobError::Database(e.to_string()))?;

        let result = conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.status.as_str(),
                job.prompt,
                parameters_json,
                job.model,
                job.attempt_count,
                job.max_attempts,
                job.result_locator,
                job.result_content_type,
                job.result_size_bytes.map(|v| v as i64),
                job.error_detail,
                job.progress,
                format_ts(&job.created_at),
                format_ts(&job.updated_at),
                job.started_at.as_ref().map(format_ts),
                job.finished_at.as_ref().map(format_ts),
                format_ts(&job.scheduled_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(JobError::AlreadyExists(job.id.clone()))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        let conn = self.lock()?;
        Self::select_job(&conn, id)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)
            .map_err(db_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }

    fn conditional_update(
        &self,
        id: &str,
        expected: JobStatus,
        transition: Transition,
    ) -> Result<UpdateOutcome, JobError> {
        if !transition.allowed_from(expected) {
            return Err(JobError::InvalidTransition {
                from: expected,
                transition: transition.name(),
            });
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;

        let written = Self::apply_transition(&tx, id, expected, &transition).map_err(db_err)?;
        let stored = Self::select_job(&tx, id)?;
        tx.commit().map_err(db_err)?;

        match (written, stored) {
            (_, None) => Err(JobError::NotFound(id.to_string())),
            (0, Some(job)) => Ok(UpdateOutcome::Rejected {
                current: job.status,
            }),
            (_, Some(job)) => Ok(UpdateOutcome::Applied(job)),
        }
    }

    fn update_progress(&self, id: &str, progress: u8) -> Result<bool, JobError> {
        let conn = self.lock()?;
        let written = conn
            .execute(
                "UPDATE jobs SET progress = MAX(progress, ?1), updated_at = ?2 \
                 WHERE id = ?3 AND status = 'running'",
                params![progress.min(100), format_ts(&now()), id],
            )
            .map_err(db_err)?;
        Ok(written > 0)
    }

    fn reschedule_pending(
        &self,
        id: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, JobError> {
        let conn = self.lock()?;
        let written = conn
            .execute(
                "UPDATE jobs SET scheduled_at = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND status = 'pending'",
                params![format_ts(&scheduled_at), format_ts(&now()), id],
            )
            .map_err(db_err)?;
        Ok(written > 0)
    }

    fn status_counts(&self) -> Result<HashMap<JobStatus, i64>, JobError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .map_err(db_err)?;

        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count))
            })
            .map_err(db_err)?;

        let mut counts: HashMap<JobStatus, i64> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for row in rows {
            let (status, count) = row.map_err(db_err)?;
            if let Ok(status) = status.parse::<JobStatus>() {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }

    fn purge_finished(&self, cutoff: DateTime<Utc>) -> Result<usize, JobError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM jobs WHERE status IN ('completed', 'cancelled') \
             AND finished_at IS NOT NULL AND finished_at < ?1",
            params![format_ts(&cutoff)],
        )
        .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ArtifactRef;
    use chrono::Duration as ChronoDuration;

    fn create_test_store() -> SqliteJobStore {
        SqliteJobStore::in_memory().unwrap()
    }

    fn create_test_job() -> Job {
        let mut parameters = Parameters::new();
        parameters.insert("width".to_string(), 512.into());
        parameters.insert("height".to_string(), 512.into());
        Job::new("sunset over the ocean", parameters, None, 3)
    }

    fn artifact() -> ArtifactRef {
        ArtifactRef {
            locator: "abc.png".to_string(),
            content_type: "image/png".to_string(),
            size_bytes: 42,
        }
    }

    fn started(store: &SqliteJobStore) -> Job {
        let job = create_test_job();
        store.create(&job).unwrap();
        store
            .conditional_update(&job.id, JobStatus::Pending, Transition::Start)
            .unwrap()
            .applied()
            .unwrap()
    }

    #[test]
    fn test_create_and_get_job() {
        let store = create_test_store();
        let job = create_test_job();
        store.create(&job).unwrap();

        let fetched = store.get(&job.id).unwrap().unwrap();
        assert_eq!(fetched, job);
    }

    #[test]
    fn test_get_nonexistent_job() {
        let store = create_test_store();
        assert!(store.get("nonexistent-id").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = create_test_store();
        let job = create_test_job();
        store.create(&job).unwrap();

        let result = store.create(&job);
        assert!(matches!(result, Err(JobError::AlreadyExists(_))));
    }

    #[test]
    fn test_start_increments_attempt_and_sets_started_at() {
        let store = create_test_store();
        let job = started(&store);

        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempt_count, 1);
        let first_start = job.started_at.unwrap();

        let job = store
            .conditional_update(
                &job.id,
                JobStatus::Running,
                Transition::Requeue {
                    scheduled_at: Utc::now(),
                },
            )
            .unwrap()
            .applied()
            .unwrap();
        let job = store
            .conditional_update(&job.id, JobStatus::Pending, Transition::Start)
            .unwrap()
            .applied()
            .unwrap();

        assert_eq!(job.attempt_count, 2);
        assert_eq!(job.started_at, Some(first_start));
    }

    #[test]
    fn test_stale_expected_status_is_rejected() {
        let store = create_test_store();
        let job = started(&store);

        let outcome = store
            .conditional_update(&job.id, JobStatus::Pending, Transition::Start)
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Rejected {
                current: JobStatus::Running
            }
        );

        let fetched = store.get(&job.id).unwrap().unwrap();
        assert_eq!(fetched.attempt_count, 1);
    }

    #[test]
    fn test_illegal_edge_leaves_state_unchanged() {
        let store = create_test_store();
        let job = create_test_job();
        store.create(&job).unwrap();

        let result = store.conditional_update(
            &job.id,
            JobStatus::Pending,
            Transition::Complete {
                artifact: artifact(),
            },
        );
        assert!(matches!(
            result,
            Err(JobError::InvalidTransition {
                from: JobStatus::Pending,
                transition: "complete"
            })
        ));
        assert_eq!(store.get(&job.id).unwrap().unwrap(), job);
    }

    #[test]
    fn test_update_unknown_job_is_not_found() {
        let store = create_test_store();
        let result = store.conditional_update("missing", JobStatus::Pending, Transition::Cancel);
        assert!(matches!(result, Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_complete_sets_result_fields() {
        let store = create_test_store();
        let job = started(&store);

        let job = store
            .conditional_update(
                &job.id,
                JobStatus::Running,
                Transition::Complete {
                    artifact: artifact(),
                },
            )
            .unwrap()
            .applied()
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_locator.as_deref(), Some("abc.png"));
        assert_eq!(job.result_content_type.as_deref(), Some("image/png"));
        assert_eq!(job.result_size_bytes, Some(42));
        assert!(job.error_detail.is_none());
        assert_eq!(job.progress, 100);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_fail_then_reset_clears_previous_run() {
        let store = create_test_store();
        let job = started(&store);
        store.update_progress(&job.id, 40).unwrap();

        let job = store
            .conditional_update(
                &job.id,
                JobStatus::Running,
                Transition::Fail {
                    error_detail: "generation rejected".to_string(),
                },
            )
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result_locator.is_none());
        assert_eq!(job.error_detail.as_deref(), Some("generation rejected"));

        let job = store
            .conditional_update(
                &job.id,
                JobStatus::Failed,
                Transition::Reset {
                    scheduled_at: Utc::now(),
                },
            )
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.progress, 0);
        assert!(job.error_detail.is_none());
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_cancelled_job_never_transitions_again() {
        let store = create_test_store();
        let job = started(&store);

        store
            .conditional_update(&job.id, JobStatus::Running, Transition::Cancel)
            .unwrap();

        let outcome = store
            .conditional_update(
                &job.id,
                JobStatus::Running,
                Transition::Complete {
                    artifact: artifact(),
                },
            )
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Rejected {
                current: JobStatus::Cancelled
            }
        );

        let result =
            store.conditional_update(&job.id, JobStatus::Cancelled, Transition::Cancel);
        assert!(matches!(result, Err(JobError::InvalidTransition { .. })));
    }

    #[test]
    fn test_start_refuses_to_exceed_attempt_ceiling() {
        let store = create_test_store();
        let mut job = create_test_job();
        job.max_attempts = 0;
        store.create(&job).unwrap();

        let job = store
            .conditional_update(&job.id, JobStatus::Pending, Transition::Start)
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(job.attempt_count, 1);

        store
            .conditional_update(
                &job.id,
                JobStatus::Running,
                Transition::Requeue {
                    scheduled_at: Utc::now(),
                },
            )
            .unwrap();

        let outcome = store
            .conditional_update(&job.id, JobStatus::Pending, Transition::Start)
            .unwrap();
        assert!(!outcome.is_applied());
        assert_eq!(store.get(&job.id).unwrap().unwrap().attempt_count, 1);
    }

    #[test]
    fn test_progress_is_monotonic_and_running_only() {
        let store = create_test_store();
        let pending = create_test_job();
        store.create(&pending).unwrap();
        assert!(!store.update_progress(&pending.id, 10).unwrap());

        let job = started(&store);
        assert!(store.update_progress(&job.id, 50).unwrap());
        assert!(store.update_progress(&job.id, 20).unwrap());
        assert_eq!(store.get(&job.id).unwrap().unwrap().progress, 50);
        assert!(store.update_progress(&job.id, 250).unwrap());
        assert_eq!(store.get(&job.id).unwrap().unwrap().progress, 100);
    }

    #[test]
    fn test_list_newest_first_with_pagination() {
        let store = create_test_store();
        let base = Utc::now() - ChronoDuration::minutes(10);
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut job = create_test_job();
            job.created_at = base + ChronoDuration::seconds(i);
            store.create(&job).unwrap();
            ids.push(job.id);
        }

        let first = store.list(&JobFilter::new().with_limit(2)).unwrap();
        let second = store
            .list(&JobFilter::new().with_limit(2).with_offset(2))
            .unwrap();
        let third = store
            .list(&JobFilter::new().with_limit(2).with_offset(4))
            .unwrap();

        let listed: Vec<String> = first
            .iter()
            .chain(second.iter())
            .chain(third.iter())
            .map(|j| j.id.clone())
            .collect();
        ids.reverse();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_list_snapshot_excludes_later_inserts() {
        let store = create_test_store();
        let mut old = create_test_job();
        old.created_at = Utc::now() - ChronoDuration::minutes(1);
        store.create(&old).unwrap();

        let snapshot = Utc::now() - ChronoDuration::seconds(30);
        store.create(&create_test_job()).unwrap();

        let jobs = store
            .list(&JobFilter::new().with_snapshot(snapshot))
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, old.id);
    }

    #[test]
    fn test_list_and_count_with_status_filter() {
        let store = create_test_store();
        store.create(&create_test_job()).unwrap();
        started(&store);

        let filter = JobFilter::new().with_status(JobStatus::Running);
        assert_eq!(store.list(&filter).unwrap().len(), 1);
        assert_eq!(store.count(&filter).unwrap(), 1);
        assert_eq!(store.count(&JobFilter::new()).unwrap(), 2);
    }

    #[test]
    fn test_reschedule_only_touches_pending() {
        let store = create_test_store();
        let pending = create_test_job();
        store.create(&pending).unwrap();
        let running = started(&store);

        let later = Utc::now() + ChronoDuration::minutes(5);
        assert!(store.reschedule_pending(&pending.id, later).unwrap());
        assert!(!store.reschedule_pending(&running.id, later).unwrap());

        let fetched = store.get(&pending.id).unwrap().unwrap();
        assert_eq!(format_ts(&fetched.scheduled_at), format_ts(&later));
    }

    #[test]
    fn test_status_counts() {
        let store = create_test_store();
        store.create(&create_test_job()).unwrap();
        store.create(&create_test_job()).unwrap();
        started(&store);

        let counts = store.status_counts().unwrap();
        assert_eq!(counts[&JobStatus::Pending], 2);
        assert_eq!(counts[&JobStatus::Running], 1);
        assert_eq!(counts[&JobStatus::Completed], 0);
    }

    #[test]
    fn test_purge_finished_keeps_recent_and_failed() {
        let store = create_test_store();
        let done = started(&store);
        store
            .conditional_update(
                &done.id,
                JobStatus::Running,
                Transition::Complete {
                    artifact: artifact(),
                },
            )
            .unwrap();
        let failed = started(&store);
        store
            .conditional_update(
                &failed.id,
                JobStatus::Running,
                Transition::Fail {
                    error_detail: "x".to_string(),
                },
            )
            .unwrap();

        assert_eq!(store.purge_finished(Utc::now() - ChronoDuration::hours(1)).unwrap(), 0);
        assert_eq!(store.purge_finished(Utc::now() + ChronoDuration::seconds(1)).unwrap(), 1);
        assert!(store.get(&done.id).unwrap().is_none());
        assert!(store.get(&failed.id).unwrap().is_some());
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("jobs.db");

        let store = SqliteJobStore::new(&db_path).unwrap();
        let job = create_test_job();
        store.create(&job).unwrap();
        assert!(db_path.exists());
        drop(store);

        let reopened = SqliteJobStore::new(&db_path).unwrap();
        assert!(reopened.get(&job.id).unwrap().is_some());
    }
}
