use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    filing::orchestrator::{process_unprocessed_emails, scan_mailbox_for_attachments},
    filing::FilingError,
    jobs::JOB_FILING_BATCH,
    models::Job,
    state::AppState,
};

use super::{JobExecution, JobHandler};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingBatchMode {
    /// Pull new messages from the mail provider, then file them.
    #[default]
    Scan,
    /// File emails already stored but not yet processed.
    Unprocessed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilingBatchPayload {
    #[serde(default)]
    pub mode: FilingBatchMode,
}

/// Scheduled filing run queued by the maintenance binary.
pub struct FilingBatchJob;

#[async_trait]
impl JobHandler for FilingBatchJob {
    fn job_type(&self) -> &'static str {
        JOB_FILING_BATCH
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: FilingBatchPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid filing-batch payload: {err}"),
                }
            }
        };

        let result = match payload.mode {
            FilingBatchMode::Scan => scan_mailbox_for_attachments(&state).await,
            FilingBatchMode::Unprocessed => process_unprocessed_emails(&state).await,
        };

        match result {
            Ok(report) if report.success => {
                info!(
                    job_id = %job.id,
                    mode = ?payload.mode,
                    emails_processed = report.emails_processed,
                    attachments_filed = report.attachments_filed,
                    attachments_failed = report.attachments_failed,
                    "filing batch finished"
                );
                JobExecution::Success
            }
            Ok(report) => JobExecution::Retry {
                delay: Duration::from_secs(300),
                error: format!("{} emails failed and none succeeded", report.failures.len()),
            },
            Err(FilingError::MailboxNotConfigured) => JobExecution::Failed {
                error: FilingError::MailboxNotConfigured.to_string(),
            },
            Err(err) => JobExecution::Retry {
                delay: Duration::from_secs(60),
                error: err.to_string(),
            },
        }
    }
}
