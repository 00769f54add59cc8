use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::filing::orchestrator::{
    process_email_for_filing, process_unprocessed_emails, scan_mailbox_for_attachments,
};
use crate::filing::{BatchReport, DestinationType, EmailFilingReport, FilingStatus};
use crate::models::{AttachmentFiling, InboundEmail};
use crate::schema::{attachment_filings, inbound_emails};
use crate::state::AppState;
use crate::storage::filed_object_key;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;
const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Deserialize)]
pub struct ListFilingsQuery {
    pub status: Option<String>,
    pub email_id: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct ListEmailsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct FilingResponse {
    pub id: Uuid,
    pub source_email_id: Uuid,
    pub attachment_id: Uuid,
    pub filename: String,
    pub filing_status: String,
    pub document_category: Option<String>,
    pub extracted_document_number: Option<String>,
    pub vendor_name: Option<String>,
    pub extracted_amount: Option<f64>,
    pub extracted_currency: Option<String>,
    pub destination_type: String,
    pub destination_path: Option<String>,
    pub filing_rule_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub version: i32,
    pub created_at: NaiveDateTime,
    pub filed_at: Option<NaiveDateTime>,
}

impl From<AttachmentFiling> for FilingResponse {
    fn from(filing: AttachmentFiling) -> Self {
        Self {
            id: filing.id,
            source_email_id: filing.source_email_id,
            attachment_id: filing.attachment_id,
            filename: filing.filename,
            filing_status: filing.filing_status,
            document_category: filing.document_category,
            extracted_document_number: filing.extracted_document_number,
            vendor_name: filing.vendor_name,
            extracted_amount: filing.extracted_amount,
            extracted_currency: filing.extracted_currency,
            destination_type: filing.destination_type,
            destination_path: filing.destination_path,
            filing_rule_id: filing.filing_rule_id,
            error_message: filing.error_message,
            version: filing.version,
            created_at: filing.created_at,
            filed_at: filing.filed_at,
        }
    }
}

#[derive(Serialize)]
pub struct EmailResponse {
    pub id: Uuid,
    pub provider_message_id: String,
    pub sender_address: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub received_at: NaiveDateTime,
    pub classification: Option<String>,
    pub processing_status: String,
    pub processed_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
}

impl From<InboundEmail> for EmailResponse {
    fn from(email: InboundEmail) -> Self {
        Self {
            id: email.id,
            provider_message_id: email.provider_message_id,
            sender_address: email.sender_address,
            sender_name: email.sender_name,
            subject: email.subject,
            received_at: email.received_at,
            classification: email.classification,
            processing_status: email.processing_status,
            processed_at: email.processed_at,
            last_error: email.last_error,
        }
    }
}

#[derive(Serialize)]
pub struct DownloadResponse {
    pub url: String,
    pub expires_in_seconds: u64,
}

fn page_size(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

pub async fn list_filings(
    State(state): State<AppState>,
    Query(query): Query<ListFilingsQuery>,
) -> AppResult<Json<Vec<FilingResponse>>> {
    let mut conn = state.db()?;
    let mut statement = attachment_filings::table
        .order((
            attachment_filings::created_at.desc(),
            attachment_filings::id.asc(),
        ))
        .limit(page_size(query.limit))
        .into_boxed();

    if let Some(status) = query.status.as_deref() {
        let status: FilingStatus = status.parse().map_err(AppError::bad_request)?;
        statement = statement.filter(attachment_filings::filing_status.eq(status.as_str()));
    }
    if let Some(email_id) = query.email_id {
        statement = statement.filter(attachment_filings::source_email_id.eq(email_id));
    }

    let filings: Vec<AttachmentFiling> = statement.load(&mut conn)?;
    Ok(Json(filings.into_iter().map(FilingResponse::from).collect()))
}

pub async fn get_filing(
    State(state): State<AppState>,
    Path(filing_id): Path<Uuid>,
) -> AppResult<Json<FilingResponse>> {
    let mut conn = state.db()?;
    let filing: AttachmentFiling = attachment_filings::table.find(filing_id).first(&mut conn)?;
    Ok(Json(filing.into()))
}

/// Short-lived link to a filed document in the destination bucket.
pub async fn download_filing(
    State(state): State<AppState>,
    Path(filing_id): Path<Uuid>,
) -> AppResult<Json<DownloadResponse>> {
    let mut conn = state.db()?;
    let filing: AttachmentFiling = attachment_filings::table.find(filing_id).first(&mut conn)?;
    drop(conn);

    if filing.filing_status != FilingStatus::Filed.as_str() {
        return Err(AppError::conflict(format!(
            "filing is {}, only filed documents can be downloaded",
            filing.filing_status
        )));
    }
    let destination: DestinationType = filing
        .destination_type
        .parse()
        .map_err(AppError::internal)?;
    let path = filing.destination_path.as_deref().unwrap_or_default();
    let key = filed_object_key(destination, path, &filing.filename);

    let url = state
        .storage
        .presign_get_object(&key, DOWNLOAD_URL_TTL)
        .await
        .map_err(|err| AppError::internal(format!("{err:#}")))?;

    Ok(Json(DownloadResponse {
        url,
        expires_in_seconds: DOWNLOAD_URL_TTL.as_secs(),
    }))
}

pub async fn list_emails(
    State(state): State<AppState>,
    Query(query): Query<ListEmailsQuery>,
) -> AppResult<Json<Vec<EmailResponse>>> {
    let mut conn = state.db()?;
    let mut statement = inbound_emails::table
        .order((inbound_emails::received_at.desc(), inbound_emails::id.asc()))
        .limit(page_size(query.limit))
        .into_boxed();
    if let Some(status) = query.status.as_deref() {
        statement = statement.filter(inbound_emails::processing_status.eq(status.to_string()));
    }

    let emails: Vec<InboundEmail> = statement.load(&mut conn)?;
    Ok(Json(emails.into_iter().map(EmailResponse::from).collect()))
}

pub async fn file_email(
    State(state): State<AppState>,
    Path(email_id): Path<Uuid>,
) -> AppResult<Json<EmailFilingReport>> {
    let report = process_email_for_filing(&state, email_id).await?;
    Ok(Json(report))
}

pub async fn scan_mailbox(State(state): State<AppState>) -> AppResult<Json<BatchReport>> {
    let report = scan_mailbox_for_attachments(&state).await?;
    Ok(Json(report))
}

pub async fn process_pending_emails(State(state): State<AppState>) -> AppResult<Json<BatchReport>> {
    let report = process_unprocessed_emails(&state).await?;
    Ok(Json(report))
}
