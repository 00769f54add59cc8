use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    jobs::{reclaim_stale_jobs, reserve_job, settle_job, JobQueueError, Settlement},
    models::Job,
    state::AppState,
};

pub use crate::jobs::JobExecution;

pub mod filing;
pub mod notify;

/// Jobs left in `processing` longer than this are assumed orphaned.
const STALE_JOB_MINUTES: i64 = 15;

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

/// Polls the queue and runs one job at a time with the matching handler.
pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers,
            poll_interval,
        }
    }

    /// Runs jobs until `shutdown` resolves. A job already in flight is finished first.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        info!(?job_types, "worker started");
        self.reclaim_orphans();

        loop {
            let pause = match self.tick().await {
                Ok(true) => Duration::ZERO,
                Ok(false) => self.poll_interval,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    self.poll_interval
                }
            };
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = sleep(pause) => {}
            }
        }
        info!("worker stopped");
    }

    fn reclaim_orphans(&self) {
        let cutoff = Utc::now().naive_utc() - ChronoDuration::minutes(STALE_JOB_MINUTES);
        let reclaimed = self
            .state
            .db()
            .map_err(|err| err.to_string())
            .and_then(|mut conn| {
                reclaim_stale_jobs(&mut conn, cutoff).map_err(|err| err.to_string())
            });
        match reclaimed {
            Ok(0) => {}
            Ok(count) => warn!(count, "requeued jobs orphaned by a stopped worker"),
            Err(err) => error!(error = %err, "failed to reclaim orphaned jobs"),
        }
    }

    /// Runs at most one due job; `Ok(false)` means nothing was ready.
    pub async fn tick(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let reserved = match self.state.db() {
            Ok(mut conn) => reserve_job(&mut conn, &job_types)?,
            Err(err) => {
                error!(%err, "failed to obtain database connection in worker");
                return Ok(false);
            }
        };
        let Some(job) = reserved else {
            return Ok(false);
        };

        let execution = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => handler.handle(self.state.clone(), job.clone()).await,
            None => JobExecution::Failed {
                error: format!("no handler registered for {}", job.job_type),
            },
        };

        let settlement = execution.settle(job.attempts, Utc::now().naive_utc());
        match &settlement {
            Settlement::Succeeded => {
                info!(job_id = %job.id, job_type = %job.job_type, "job completed")
            }
            Settlement::Requeued { run_after, error } => warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                %run_after,
                %error,
                "job will retry"
            ),
            Settlement::Failed { error } => error!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                %error,
                "job failed"
            ),
        }

        match self.state.db() {
            Ok(mut conn) => settle_job(&mut conn, job.id, &settlement)?,
            Err(err) => {
                error!(job_id = %job.id, %err, "could not record job result; it will be reclaimed")
            }
        }
        Ok(true)
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(notify::NotifyVendorJob),
        Arc::new(filing::FilingBatchJob),
    ]
}
