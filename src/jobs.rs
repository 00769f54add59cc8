//! Durable work queue kept in the `jobs` table.

use std::fmt;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::select;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const JOB_NOTIFY_VENDOR: &str = "notify-vendor";
pub const JOB_FILING_BATCH: &str = "filing-batch";

/// Attempts after which a retrying job is marked failed instead of requeued.
pub const MAX_ATTEMPTS: i32 = 3;

const FALLBACK_RETRY_DELAY_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// What a handler reports back for one run of a job.
#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

/// The row update that records a finished run.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Succeeded,
    Requeued {
        run_after: NaiveDateTime,
        error: String,
    },
    Failed {
        error: String,
    },
}

impl JobExecution {
    /// Decides how the queue records this result on the `attempts`-th run.
    pub fn settle(self, attempts: i32, now: NaiveDateTime) -> Settlement {
        match self {
            JobExecution::Success => Settlement::Succeeded,
            JobExecution::Retry { delay, error } if attempts < MAX_ATTEMPTS => {
                let delay = ChronoDuration::from_std(delay)
                    .unwrap_or_else(|_| ChronoDuration::seconds(FALLBACK_RETRY_DELAY_SECS));
                Settlement::Requeued {
                    run_after: now + delay,
                    error,
                }
            }
            JobExecution::Retry { error, .. } => Settlement::Failed {
                error: format!("gave up after {attempts} attempts: {error}"),
            },
            JobExecution::Failed { error } => Settlement::Failed { error },
        }
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = jobs)]
struct SettlementChanges<'a> {
    status: &'a str,
    run_after: Option<NaiveDateTime>,
    last_error: Option<Option<&'a str>>,
    updated_at: NaiveDateTime,
}

pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Job> {
    let new_job = NewJob {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        payload,
        status: JobStatus::Queued.as_str().to_string(),
        run_after: run_after.unwrap_or_else(|| Utc::now().naive_utc()),
    };

    Ok(diesel::insert_into(jobs::table)
        .values(&new_job)
        .get_result(conn)?)
}

/// True when a job of this type is queued or currently running.
pub fn has_open_job(conn: &mut PgConnection, job_type: &str) -> JobQueueResult<bool> {
    let open = select(exists(
        jobs::table.filter(jobs::job_type.eq(job_type)).filter(
            jobs::status.eq_any([JobStatus::Queued.as_str(), JobStatus::Processing.as_str()]),
        ),
    ))
    .get_result(conn)?;
    Ok(open)
}

/// Claims the oldest due job of the given types. Concurrent workers skip rows another holds.
pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();

    let reserved = conn.transaction(|conn| {
        let due = jobs::table
            .filter(jobs::status.eq(JobStatus::Queued.as_str()))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order((jobs::run_after.asc(), jobs::created_at.asc()))
            .for_update()
            .skip_locked()
            .first::<Job>(conn)
            .optional()?;

        let Some(job) = due else {
            return Ok::<_, diesel::result::Error>(None);
        };
        diesel::update(jobs::table.find(job.id))
            .set((
                jobs::status.eq(JobStatus::Processing.as_str()),
                jobs::attempts.eq(jobs::attempts + 1),
                jobs::updated_at.eq(now),
            ))
            .get_result::<Job>(conn)
            .map(Some)
    })?;
    Ok(reserved)
}

/// Records the result of a run on a job this worker still holds.
pub fn settle_job(
    conn: &mut PgConnection,
    job_id: Uuid,
    settlement: &Settlement,
) -> JobQueueResult<()> {
    let changes = match settlement {
        Settlement::Succeeded => SettlementChanges {
            status: JobStatus::Succeeded.as_str(),
            run_after: None,
            last_error: Some(None),
            updated_at: Utc::now().naive_utc(),
        },
        Settlement::Requeued { run_after, error } => SettlementChanges {
            status: JobStatus::Queued.as_str(),
            run_after: Some(*run_after),
            last_error: Some(Some(error)),
            updated_at: Utc::now().naive_utc(),
        },
        Settlement::Failed { error } => SettlementChanges {
            status: JobStatus::Failed.as_str(),
            run_after: None,
            last_error: Some(Some(error)),
            updated_at: Utc::now().naive_utc(),
        },
    };

    diesel::update(
        jobs::table
            .find(job_id)
            .filter(jobs::status.eq(JobStatus::Processing.as_str())),
    )
    .set(&changes)
    .execute(conn)?;
    Ok(())
}

/// Puts `processing` jobs untouched since `cutoff` back in the queue (their worker died).
pub fn reclaim_stale_jobs(conn: &mut PgConnection, cutoff: NaiveDateTime) -> JobQueueResult<usize> {
    let reclaimed = diesel::update(
        jobs::table
            .filter(jobs::status.eq(JobStatus::Processing.as_str()))
            .filter(jobs::updated_at.lt(cutoff)),
    )
    .set((
        jobs::status.eq(JobStatus::Queued.as_str()),
        jobs::last_error.eq(Some("reclaimed from a stopped worker")),
        jobs::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)?;
    Ok(reclaimed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn retries_are_requeued_until_attempts_run_out() {
        let retry = || JobExecution::Retry {
            delay: Duration::from_secs(60),
            error: "webhook timed out".into(),
        };

        assert_eq!(
            retry().settle(1, now()),
            Settlement::Requeued {
                run_after: now() + ChronoDuration::seconds(60),
                error: "webhook timed out".into(),
            }
        );
        assert_eq!(
            retry().settle(MAX_ATTEMPTS, now()),
            Settlement::Failed {
                error: "gave up after 3 attempts: webhook timed out".into(),
            }
        );
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let settled = JobExecution::Failed {
            error: "invalid payload".into(),
        }
        .settle(1, now());
        assert_eq!(
            settled,
            Settlement::Failed {
                error: "invalid payload".into()
            }
        );
        assert_eq!(JobExecution::Success.settle(2, now()), Settlement::Succeeded);
    }
}
