use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    jobs::JOB_NOTIFY_VENDOR, models::Job, procurement::VendorNotice, state::AppState,
};

use super::{JobExecution, JobHandler};

const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Delivers one award or rejection notice; failures never touch the awarded RFQ.
pub struct NotifyVendorJob;

#[async_trait]
impl JobHandler for NotifyVendorJob {
    fn job_type(&self) -> &'static str {
        JOB_NOTIFY_VENDOR
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let notice: VendorNotice = match serde_json::from_value(job.payload.clone()) {
            Ok(notice) => notice,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid notify-vendor payload: {err}"),
                }
            }
        };

        match state.notifier.send(&notice.message()).await {
            Ok(()) => {
                info!(
                    job_id = %job.id,
                    quote_id = %notice.quote_id,
                    awarded = notice.awarded,
                    "vendor notified"
                );
                JobExecution::Success
            }
            Err(err) => {
                warn!(job_id = %job.id, quote_id = %notice.quote_id, error = %err, "vendor notification failed");
                JobExecution::Retry {
                    delay: RETRY_DELAY,
                    error: format!("{err:#}"),
                }
            }
        }
    }
}
