use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::task;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::documents::DocumentInput;
use super::mailbox::{MailMessage, MailProvider};
use super::rules::{self, FilingCandidate};
use super::sender::{SenderClassification, SenderMessage, SenderRuleSet};
use super::{DestinationType, FilingStatus, EMAIL_FAILED, EMAIL_PROCESSED, EMAIL_UNPROCESSED};
use crate::error::AppError;
use crate::models::{
    AttachmentFiling, EmailAttachment, FilingRule, InboundEmail, NewAttachmentFiling,
    NewEmailAttachment, NewInboundEmail, SenderRule,
};
use crate::schema::{attachment_filings, email_attachments, filing_rules, inbound_emails, sender_rules};
use crate::state::AppState;
use crate::storage::{attachment_content_disposition, filed_object_key};

/// `processing` filings untouched for this long belong to a run that died.
pub const STALE_FILING_MINUTES: i64 = 15;

const ABANDONED_FILING_ERROR: &str = "abandoned while processing";

#[derive(Debug, Error)]
pub enum FilingError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("database task failed: {0}")]
    Task(String),
    #[error("mail provider is not configured")]
    MailboxNotConfigured,
    #[error("mail provider error: {0}")]
    Mailbox(String),
    #[error("document classification failed: {0}")]
    Classification(String),
    #[error("routing failed: {0}")]
    Routing(String),
    #[error("destination write failed: {0}")]
    Storage(String),
    #[error("email {0} not found")]
    EmailNotFound(Uuid),
    #[error("filing {0} was modified concurrently")]
    Conflict(Uuid),
    #[error("filing cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: FilingStatus },
}

impl From<FilingError> for AppError {
    fn from(value: FilingError) -> Self {
        match value {
            FilingError::MailboxNotConfigured => AppError::service_unavailable(value.to_string()),
            FilingError::EmailNotFound(_) => AppError::not_found(),
            FilingError::Conflict(_) | FilingError::InvalidTransition { .. } => {
                AppError::conflict(value.to_string())
            }
            FilingError::Mailbox(_) => {
                AppError::new(axum::http::StatusCode::BAD_GATEWAY, value.to_string())
            }
            other => AppError::internal(other),
        }
    }
}

/// Extracted data and destination written together with a status transition.
#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = attachment_filings)]
pub struct FilingOutcome {
    pub extracted_document_number: Option<String>,
    pub vendor_name: Option<String>,
    pub document_category: Option<String>,
    pub destination_type: Option<String>,
    pub destination_path: Option<String>,
    pub extracted_amount: Option<f64>,
    pub extracted_currency: Option<String>,
    pub filing_rule_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub filed_at: Option<NaiveDateTime>,
}

impl FilingOutcome {
    fn with_error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailFilingReport {
    pub email_id: Uuid,
    pub classification: SenderClassification,
    pub filed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub claimed_elsewhere: usize,
    /// Filings still pending or processing after this run; the email stays unprocessed.
    pub in_flight: usize,
    pub errors: Vec<String>,
}

impl EmailFilingReport {
    fn new(email_id: Uuid, classification: SenderClassification) -> Self {
        Self {
            email_id,
            classification,
            filed: 0,
            skipped: 0,
            failed: 0,
            claimed_elsewhere: 0,
            in_flight: 0,
            errors: Vec::new(),
        }
    }

    /// Something was filed or skipped, or everything settled without failures.
    fn settled(&self) -> bool {
        self.filed + self.skipped > 0 || (self.failed == 0 && self.in_flight == 0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub email_id: Option<Uuid>,
    pub provider_message_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub emails_scanned: usize,
    pub emails_processed: usize,
    pub attachments_filed: usize,
    pub attachments_skipped: usize,
    pub attachments_failed: usize,
    pub failures: Vec<BatchFailure>,
    pub success: bool,
}

impl BatchReport {
    fn absorb(&mut self, email: &EmailFilingReport) {
        self.attachments_filed += email.filed;
        self.attachments_skipped += email.skipped;
        self.attachments_failed += email.failed;
        if email.failed > 0 {
            self.failures.push(BatchFailure {
                email_id: Some(email.email_id),
                provider_message_id: None,
                error: email.errors.join("; "),
            });
        }
        if email.settled() {
            self.emails_processed += 1;
        }
    }

    fn finish(mut self) -> Self {
        self.success = self.failures.is_empty() || self.emails_processed > 0;
        self
    }
}

enum Disposition {
    Filed,
    Skipped,
}

/// Rule sets loaded once per invocation.
struct FilingContext {
    senders: SenderRuleSet,
    filing_rules: Vec<FilingRule>,
}

impl FilingContext {
    fn load(conn: &mut PgConnection) -> Result<Self, FilingError> {
        let stored_senders: Vec<SenderRule> = sender_rules::table.load(conn)?;
        let enabled_rules: Vec<FilingRule> = filing_rules::table
            .filter(filing_rules::is_enabled.eq(true))
            .load(conn)?;
        let senders = SenderRuleSet::compile(&stored_senders);
        debug!(
            sender_rules = senders.len(),
            filing_rules = enabled_rules.len(),
            "loaded filing context"
        );
        Ok(Self {
            senders,
            filing_rules: enabled_rules,
        })
    }
}

/// Runs a diesel stage on the blocking pool with its own short-lived connection.
async fn with_conn<T, F>(state: &AppState, stage: F) -> Result<T, FilingError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, FilingError> + Send + 'static,
    T: Send + 'static,
{
    let pool = state.pool.clone();
    task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|err| FilingError::Pool(err.to_string()))?;
        stage(&mut conn)
    })
    .await
    .map_err(|err| FilingError::Task(err.to_string()))?
}

/// Whether attachments from a sender with this classification may be filed.
pub fn sender_is_eligible(classification: SenderClassification, accept_unknown: bool) -> bool {
    match classification {
        SenderClassification::Legitimate => true,
        SenderClassification::Unknown => accept_unknown,
        _ => false,
    }
}

/// Compare-and-swap status change; fails with `Conflict` when the row moved underneath us.
pub fn transition_filing(
    conn: &mut PgConnection,
    filing: &AttachmentFiling,
    to: FilingStatus,
    outcome: &FilingOutcome,
) -> Result<AttachmentFiling, FilingError> {
    let from = filing
        .filing_status
        .parse::<FilingStatus>()
        .map_err(|_| FilingError::InvalidTransition {
            from: filing.filing_status.clone(),
            to,
        })?;
    if !from.can_transition_to(to) {
        return Err(FilingError::InvalidTransition {
            from: from.to_string(),
            to,
        });
    }

    let updated = diesel::update(
        attachment_filings::table
            .filter(attachment_filings::id.eq(filing.id))
            .filter(attachment_filings::filing_status.eq(from.as_str()))
            .filter(attachment_filings::version.eq(filing.version)),
    )
    .set((
        attachment_filings::filing_status.eq(to.as_str()),
        attachment_filings::version.eq(filing.version + 1),
        attachment_filings::updated_at.eq(Utc::now().naive_utc()),
        outcome,
    ))
    .get_result::<AttachmentFiling>(conn)
    .optional()?;

    updated.ok_or(FilingError::Conflict(filing.id))
}

async fn transition(
    state: &AppState,
    filing: &AttachmentFiling,
    to: FilingStatus,
    outcome: FilingOutcome,
) -> Result<AttachmentFiling, FilingError> {
    let filing = filing.clone();
    with_conn(state, move |conn| transition_filing(conn, &filing, to, &outcome)).await
}

/// Fails `processing` filings of an email whose run stopped before `cutoff`, so they can be re-offered.
pub fn reclaim_stale_filings(
    conn: &mut PgConnection,
    email_id: Uuid,
    cutoff: NaiveDateTime,
) -> Result<usize, FilingError> {
    debug_assert!(FilingStatus::Processing.can_transition_to(FilingStatus::Failed));
    let reclaimed = diesel::update(
        attachment_filings::table
            .filter(attachment_filings::source_email_id.eq(email_id))
            .filter(attachment_filings::filing_status.eq(FilingStatus::Processing.as_str()))
            .filter(attachment_filings::updated_at.lt(cutoff)),
    )
    .set((
        attachment_filings::filing_status.eq(FilingStatus::Failed.as_str()),
        attachment_filings::version.eq(attachment_filings::version + 1),
        attachment_filings::error_message.eq(Some(ABANDONED_FILING_ERROR)),
        attachment_filings::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)?;
    Ok(reclaimed)
}

pub async fn process_email_for_filing(
    state: &AppState,
    email_id: Uuid,
) -> Result<EmailFilingReport, FilingError> {
    let mailbox = state
        .mailbox
        .clone()
        .ok_or(FilingError::MailboxNotConfigured)?;

    let (email, context) = with_conn(state, move |conn| {
        let email: InboundEmail = inbound_emails::table
            .find(email_id)
            .first(conn)
            .optional()?
            .ok_or(FilingError::EmailNotFound(email_id))?;
        Ok((email, FilingContext::load(conn)?))
    })
    .await?;

    file_email(state, mailbox.as_ref(), &context, email).await
}

/// Files stored emails that have not been processed yet, oldest first.
pub async fn process_unprocessed_emails(state: &AppState) -> Result<BatchReport, FilingError> {
    let mailbox = state
        .mailbox
        .clone()
        .ok_or(FilingError::MailboxNotConfigured)?;

    let batch_size = state.config.filing_batch_size;
    let (emails, context) = with_conn(state, move |conn| {
        let emails: Vec<InboundEmail> = inbound_emails::table
            .filter(inbound_emails::processing_status.eq(EMAIL_UNPROCESSED))
            .order((inbound_emails::received_at.asc(), inbound_emails::id.asc()))
            .limit(batch_size)
            .load(conn)?;
        Ok((emails, FilingContext::load(conn)?))
    })
    .await?;

    let mut report = BatchReport {
        emails_scanned: emails.len(),
        ..Default::default()
    };
    run_batch(state, mailbox.as_ref(), &context, emails, &mut report).await;

    let report = report.finish();
    info!(
        emails_scanned = report.emails_scanned,
        emails_processed = report.emails_processed,
        attachments_filed = report.attachments_filed,
        failures = report.failures.len(),
        "processed unprocessed emails"
    );
    Ok(report)
}

/// Pulls recent messages with attachments from the mail provider, stores unseen ones and files them.
pub async fn scan_mailbox_for_attachments(state: &AppState) -> Result<BatchReport, FilingError> {
    let mailbox = state
        .mailbox
        .clone()
        .ok_or(FilingError::MailboxNotConfigured)?;
    let limit = usize::try_from(state.config.filing_batch_size).unwrap_or(1);
    let mut messages = mailbox
        .list_messages_with_attachments(limit)
        .await
        .map_err(|err| FilingError::Mailbox(format!("{err:#}")))?;
    messages.truncate(limit);

    let mut report = BatchReport {
        emails_scanned: messages.len(),
        ..Default::default()
    };

    let (fresh, ingest_failures, context) = with_conn(state, move |conn| {
        let mut fresh = Vec::new();
        let mut failures = Vec::new();
        for message in &messages {
            match ingest_message(conn, message) {
                Ok(Some(email)) => fresh.push(email),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        provider_message_id = %message.provider_message_id,
                        error = %err,
                        "failed to ingest message"
                    );
                    failures.push(BatchFailure {
                        email_id: None,
                        provider_message_id: Some(message.provider_message_id.clone()),
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok((fresh, failures, FilingContext::load(conn)?))
    })
    .await?;
    report.failures = ingest_failures;

    run_batch(state, mailbox.as_ref(), &context, fresh, &mut report).await;

    let report = report.finish();
    info!(
        emails_scanned = report.emails_scanned,
        emails_processed = report.emails_processed,
        attachments_filed = report.attachments_filed,
        failures = report.failures.len(),
        "mailbox scan finished"
    );
    Ok(report)
}

async fn run_batch(
    state: &AppState,
    mailbox: &dyn MailProvider,
    context: &FilingContext,
    emails: Vec<InboundEmail>,
    report: &mut BatchReport,
) {
    for email in emails {
        let email_id = email.id;
        match file_email(state, mailbox, context, email).await {
            Ok(email_report) => report.absorb(&email_report),
            Err(err) => {
                warn!(email_id = %email_id, error = %err, "email filing aborted");
                let message = err.to_string();
                let last_error = message.clone();
                let marked = with_conn(state, move |conn| {
                    diesel::update(inbound_emails::table.find(email_id))
                        .set((
                            inbound_emails::processing_status.eq(EMAIL_FAILED),
                            inbound_emails::last_error.eq(Some(last_error)),
                        ))
                        .execute(conn)?;
                    Ok(())
                })
                .await;
                if let Err(mark_err) = marked {
                    warn!(email_id = %email_id, error = %mark_err, "failed to record email failure");
                }
                report.failures.push(BatchFailure {
                    email_id: Some(email_id),
                    provider_message_id: None,
                    error: message,
                });
            }
        }
    }
}

/// Stores a message and its attachments; `None` when the message was already ingested.
fn ingest_message(
    conn: &mut PgConnection,
    message: &MailMessage,
) -> Result<Option<InboundEmail>, FilingError> {
    conn.transaction(|conn| {
        let new_email = NewInboundEmail {
            id: Uuid::new_v4(),
            provider_message_id: message.provider_message_id.clone(),
            sender_address: message.sender_address.clone(),
            sender_name: message.sender_name.clone(),
            subject: message.subject.clone(),
            body_preview: message.body_preview.clone(),
            received_at: message.received_at,
            processing_status: EMAIL_UNPROCESSED.to_string(),
        };

        let inserted: Option<InboundEmail> = diesel::insert_into(inbound_emails::table)
            .values(&new_email)
            .on_conflict(inbound_emails::provider_message_id)
            .do_nothing()
            .get_result(conn)
            .optional()?;

        let Some(email) = inserted else {
            return Ok(None);
        };

        for attachment in &message.attachments {
            let new_attachment = NewEmailAttachment {
                id: Uuid::new_v4(),
                email_id: email.id,
                provider_attachment_id: attachment.provider_attachment_id.clone(),
                filename: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
                size_bytes: attachment.size_bytes,
            };
            diesel::insert_into(email_attachments::table)
                .values(&new_attachment)
                .execute(conn)?;

            diesel::insert_into(attachment_filings::table)
                .values(&NewAttachmentFiling {
                    id: Uuid::new_v4(),
                    source_email_id: email.id,
                    attachment_id: new_attachment.id,
                    filename: new_attachment.filename.clone(),
                    filing_status: FilingStatus::Pending.as_str().to_string(),
                    destination_type: DestinationType::Pending.as_str().to_string(),
                })
                .execute(conn)?;
        }

        Ok(Some(email))
    })
}

/// Gives every attachment without a live filing (none yet, or only failed ones) a pending one.
fn ensure_live_filings(
    conn: &mut PgConnection,
    email_id: Uuid,
    attachments: &[EmailAttachment],
) -> Result<Vec<AttachmentFiling>, FilingError> {
    let existing: Vec<AttachmentFiling> = attachment_filings::table
        .filter(attachment_filings::source_email_id.eq(email_id))
        .load(conn)?;

    for attachment in attachments {
        let live = existing.iter().any(|filing| {
            filing.attachment_id == attachment.id
                && filing.filing_status != FilingStatus::Failed.as_str()
        });
        if live {
            continue;
        }
        diesel::insert_into(attachment_filings::table)
            .values(&NewAttachmentFiling {
                id: Uuid::new_v4(),
                source_email_id: email_id,
                attachment_id: attachment.id,
                filename: attachment.filename.clone(),
                filing_status: FilingStatus::Pending.as_str().to_string(),
                destination_type: DestinationType::Pending.as_str().to_string(),
            })
            .execute(conn)?;
    }

    let pending = attachment_filings::table
        .filter(attachment_filings::source_email_id.eq(email_id))
        .filter(attachment_filings::filing_status.eq(FilingStatus::Pending.as_str()))
        .order((attachment_filings::created_at.asc(), attachment_filings::id.asc()))
        .load(conn)?;
    Ok(pending)
}

/// Classifies the email, reclaims abandoned filings and returns its attachments with their pending filings.
fn prepare_email(
    conn: &mut PgConnection,
    email_id: Uuid,
    classification: SenderClassification,
) -> Result<(Vec<EmailAttachment>, Vec<AttachmentFiling>), FilingError> {
    diesel::update(inbound_emails::table.find(email_id))
        .set(inbound_emails::classification.eq(Some(classification.as_str())))
        .execute(conn)?;

    let cutoff = Utc::now().naive_utc() - ChronoDuration::minutes(STALE_FILING_MINUTES);
    let reclaimed = reclaim_stale_filings(conn, email_id, cutoff)?;
    if reclaimed > 0 {
        warn!(email_id = %email_id, reclaimed, "failed filings abandoned by an earlier run");
    }

    let attachments: Vec<EmailAttachment> = email_attachments::table
        .filter(email_attachments::email_id.eq(email_id))
        .order((email_attachments::created_at.asc(), email_attachments::id.asc()))
        .load(conn)?;
    let pending = ensure_live_filings(conn, email_id, &attachments)?;
    Ok((attachments, pending))
}

/// Settles the email status once every filing is terminal; returns how many are still open.
fn finalize_email(
    conn: &mut PgConnection,
    email_id: Uuid,
    failed: usize,
    errors: Option<String>,
) -> Result<usize, FilingError> {
    let open: i64 = attachment_filings::table
        .filter(attachment_filings::source_email_id.eq(email_id))
        .filter(attachment_filings::filing_status.eq_any([
            FilingStatus::Pending.as_str(),
            FilingStatus::Processing.as_str(),
        ]))
        .count()
        .get_result(conn)?;
    if open > 0 {
        return Ok(usize::try_from(open).unwrap_or(usize::MAX));
    }

    let status = if failed == 0 { EMAIL_PROCESSED } else { EMAIL_FAILED };
    diesel::update(inbound_emails::table.find(email_id))
        .set((
            inbound_emails::processing_status.eq(status),
            inbound_emails::processed_at.eq(Some(Utc::now().naive_utc())),
            inbound_emails::last_error.eq(errors),
        ))
        .execute(conn)?;
    Ok(0)
}

async fn file_email(
    state: &AppState,
    mailbox: &dyn MailProvider,
    context: &FilingContext,
    email: InboundEmail,
) -> Result<EmailFilingReport, FilingError> {
    let classification = context
        .senders
        .classify(&SenderMessage {
            address: &email.sender_address,
            subject: &email.subject,
            body: &email.body_preview,
        })
        .classification;
    let email_id = email.id;
    let (attachments, pending) =
        with_conn(state, move |conn| prepare_email(conn, email_id, classification)).await?;

    let eligible = sender_is_eligible(classification, state.config.filing_accept_unknown_senders);
    let mut report = EmailFilingReport::new(email_id, classification);

    for filing in pending {
        let claimed = match transition(
            state,
            &filing,
            FilingStatus::Processing,
            FilingOutcome::default(),
        )
        .await
        {
            Ok(claimed) => claimed,
            Err(FilingError::Conflict(id)) => {
                info!(filing_id = %id, "filing already claimed by another run");
                report.claimed_elsewhere += 1;
                continue;
            }
            Err(err) => return Err(err),
        };

        if !eligible {
            let reason = format!("sender classified as {classification}");
            transition(
                state,
                &claimed,
                FilingStatus::Skipped,
                FilingOutcome::with_error(reason),
            )
            .await?;
            report.skipped += 1;
            continue;
        }

        let outcome = match attachments.iter().find(|a| a.id == claimed.attachment_id) {
            Some(attachment) => {
                file_attachment(state, mailbox, context, &email, attachment, &claimed).await
            }
            None => Err(FilingError::Routing("attachment record missing".to_string())),
        };

        match outcome {
            Ok(Disposition::Filed) => report.filed += 1,
            Ok(Disposition::Skipped) => report.skipped += 1,
            Err(err) => {
                warn!(
                    filing_id = %claimed.id,
                    email_id = %email_id,
                    filename = %claimed.filename,
                    error = %err,
                    "attachment filing failed"
                );
                if let Err(mark_err) = transition(
                    state,
                    &claimed,
                    FilingStatus::Failed,
                    FilingOutcome::with_error(err.to_string()),
                )
                .await
                {
                    warn!(filing_id = %claimed.id, error = %mark_err, "could not record filing failure");
                }
                report.failed += 1;
                report.errors.push(format!("{}: {err}", claimed.filename));
            }
        }
    }

    let failed = report.failed;
    let errors = (!report.errors.is_empty()).then(|| report.errors.join("; "));
    report.in_flight =
        with_conn(state, move |conn| finalize_email(conn, email_id, failed, errors)).await?;

    info!(
        email_id = %email_id,
        classification = %classification,
        filed = report.filed,
        skipped = report.skipped,
        failed = report.failed,
        in_flight = report.in_flight,
        "email filing finished"
    );
    Ok(report)
}

async fn file_attachment(
    state: &AppState,
    mailbox: &dyn MailProvider,
    context: &FilingContext,
    email: &InboundEmail,
    attachment: &EmailAttachment,
    claimed: &AttachmentFiling,
) -> Result<Disposition, FilingError> {
    let bytes = mailbox
        .fetch_attachment(&email.provider_message_id, &attachment.provider_attachment_id)
        .await
        .map_err(|err| FilingError::Mailbox(format!("{err:#}")))?;

    let content_type = attachment.content_type.clone().or_else(|| {
        mime_guess::from_path(&attachment.filename)
            .first()
            .map(|mime| mime.essence_str().to_string())
    });

    let facts = state
        .classifier
        .classify(&DocumentInput {
            filename: &attachment.filename,
            content_type: content_type.as_deref(),
            subject: &email.subject,
            body: &email.body_preview,
            sender_address: &email.sender_address,
            sender_name: email.sender_name.as_deref(),
            bytes: &bytes,
        })
        .await
        .map_err(|err| FilingError::Classification(format!("{err:#}")))?;

    let candidate = FilingCandidate {
        category: facts.category,
        vendor_name: facts.vendor_name.clone(),
        amount: facts.amount,
        document_number: facts.document_number.clone(),
        received_on: email.received_at.date(),
    };

    let mut outcome = FilingOutcome {
        extracted_document_number: facts.document_number,
        vendor_name: facts.vendor_name,
        document_category: Some(facts.category.as_str().to_string()),
        extracted_amount: facts.amount,
        extracted_currency: facts.currency,
        ..Default::default()
    };

    let routed = rules::route(
        &context.filing_rules,
        state.config.filing_default_destination.as_ref(),
        &candidate,
    )
    .map_err(FilingError::Routing)?;

    let Some(routed) = routed else {
        outcome.destination_type = Some(DestinationType::Pending.as_str().to_string());
        outcome.error_message = Some("no filing rule matched".to_string());
        transition(state, claimed, FilingStatus::Skipped, outcome).await?;
        return Ok(Disposition::Skipped);
    };

    let checksum = hex::encode(Sha256::digest(&bytes));
    let key = filed_object_key(
        routed.destination_type,
        &routed.destination_path,
        &attachment.filename,
    );
    state
        .storage
        .put_object(
            &key,
            bytes,
            content_type,
            attachment_content_disposition(&attachment.filename),
        )
        .await
        .map_err(|err| FilingError::Storage(format!("{err:#}")))?;

    outcome.destination_type = Some(routed.destination_type.as_str().to_string());
    outcome.destination_path = Some(routed.destination_path);
    outcome.filing_rule_id = routed.rule_id;
    outcome.filed_at = Some(Utc::now().naive_utc());

    let filing = claimed.clone();
    let rule_id = routed.rule_id;
    with_conn(state, move |conn| {
        conn.transaction::<_, FilingError, _>(|conn| {
            transition_filing(conn, &filing, FilingStatus::Filed, &outcome)?;
            if let Some(rule_id) = rule_id {
                diesel::update(filing_rules::table.find(rule_id))
                    .set((
                        filing_rules::times_matched.eq(filing_rules::times_matched + 1),
                        filing_rules::last_matched_at.eq(Some(Utc::now().naive_utc())),
                    ))
                    .execute(conn)?;
            }
            Ok(())
        })
    })
    .await?;

    info!(
        filing_id = %claimed.id,
        object_key = %key,
        sha256 = %checksum,
        category = %facts.category,
        "attachment filed"
    );
    Ok(Disposition::Filed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_legitimate_senders_are_filed_by_default() {
        assert!(sender_is_eligible(SenderClassification::Legitimate, false));
        assert!(!sender_is_eligible(SenderClassification::Unknown, false));
        assert!(sender_is_eligible(SenderClassification::Unknown, true));
        for blocked in [
            SenderClassification::Spam,
            SenderClassification::Solicitation,
            SenderClassification::Phishing,
            SenderClassification::Newsletter,
            SenderClassification::Automated,
        ] {
            assert!(!sender_is_eligible(blocked, true));
        }
    }

    #[test]
    fn batch_with_some_success_still_succeeds() {
        let mut report = BatchReport::default();
        report.absorb(&EmailFilingReport::new(Uuid::new_v4(), SenderClassification::Legitimate));
        report.failures.push(BatchFailure {
            email_id: Some(Uuid::new_v4()),
            provider_message_id: None,
            error: "boom".into(),
        });
        let report = report.finish();
        assert!(report.success);
        assert_eq!(report.emails_processed, 1);

        let mut only_failures = BatchReport::default();
        only_failures.failures.push(BatchFailure {
            email_id: None,
            provider_message_id: Some("m-1".into()),
            error: "boom".into(),
        });
        assert!(!only_failures.finish().success);
        assert!(BatchReport::default().finish().success);
    }

    #[test]
    fn batch_where_every_attachment_failed_is_not_a_success() {
        let mut email = EmailFilingReport::new(Uuid::new_v4(), SenderClassification::Legitimate);
        email.failed = 2;
        email.errors = vec!["a.pdf: write failed".into(), "b.pdf: write failed".into()];

        let mut report = BatchReport::default();
        report.absorb(&email);
        let report = report.finish();
        assert!(!report.success);
        assert_eq!(report.emails_processed, 0);
        assert_eq!(report.attachments_failed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].email_id, Some(email.email_id));
    }

    #[test]
    fn partially_filed_email_counts_but_reports_its_failures() {
        let mut email = EmailFilingReport::new(Uuid::new_v4(), SenderClassification::Legitimate);
        email.filed = 1;
        email.failed = 1;
        email.errors = vec!["b.pdf: write failed".into()];

        let mut report = BatchReport::default();
        report.absorb(&email);
        let report = report.finish();
        assert!(report.success);
        assert_eq!(report.emails_processed, 1);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn email_with_open_filings_is_not_settled() {
        let mut email = EmailFilingReport::new(Uuid::new_v4(), SenderClassification::Legitimate);
        email.in_flight = 1;
        assert!(!email.settled());
        email.skipped = 1;
        assert!(email.settled());
    }
}
