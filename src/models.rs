use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = sender_rules)]
pub struct SenderRule {
    pub id: Uuid,
    pub list_kind: String,
    pub pattern: String,
    pub pattern_type: String,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sender_rules)]
pub struct NewSenderRule {
    pub id: Uuid,
    pub list_kind: String,
    pub pattern: String,
    pub pattern_type: String,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = filing_rules)]
pub struct FilingRule {
    pub id: Uuid,
    pub name: String,
    pub priority: i32,
    pub is_enabled: bool,
    pub document_category: Option<String>,
    pub vendor_pattern: Option<String>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub destination_type: String,
    pub path_template: String,
    pub times_matched: i32,
    pub last_matched_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = filing_rules)]
pub struct NewFilingRule {
    pub id: Uuid,
    pub name: String,
    pub priority: i32,
    pub is_enabled: bool,
    pub document_category: Option<String>,
    pub vendor_pattern: Option<String>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub destination_type: String,
    pub path_template: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = inbound_emails)]
pub struct InboundEmail {
    pub id: Uuid,
    pub provider_message_id: String,
    pub sender_address: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub body_preview: String,
    pub received_at: NaiveDateTime,
    pub classification: Option<String>,
    pub processing_status: String,
    pub processed_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = inbound_emails)]
pub struct NewInboundEmail {
    pub id: Uuid,
    pub provider_message_id: String,
    pub sender_address: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub body_preview: String,
    pub received_at: NaiveDateTime,
    pub processing_status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = email_attachments)]
#[diesel(belongs_to(InboundEmail, foreign_key = email_id))]
pub struct EmailAttachment {
    pub id: Uuid,
    pub email_id: Uuid,
    pub provider_attachment_id: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = email_attachments)]
pub struct NewEmailAttachment {
    pub id: Uuid,
    pub email_id: Uuid,
    pub provider_attachment_id: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = attachment_filings)]
#[diesel(belongs_to(InboundEmail, foreign_key = source_email_id))]
#[diesel(belongs_to(EmailAttachment, foreign_key = attachment_id))]
pub struct AttachmentFiling {
    pub id: Uuid,
    pub source_email_id: Uuid,
    pub attachment_id: Uuid,
    pub filename: String,
    pub extracted_document_number: Option<String>,
    pub vendor_name: Option<String>,
    pub document_category: Option<String>,
    pub filing_status: String,
    pub destination_type: String,
    pub destination_path: Option<String>,
    pub extracted_amount: Option<f64>,
    pub extracted_currency: Option<String>,
    pub filing_rule_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub version: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub filed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = attachment_filings)]
pub struct NewAttachmentFiling {
    pub id: Uuid,
    pub source_email_id: Uuid,
    pub attachment_id: Uuid,
    pub filename: String,
    pub filing_status: String,
    pub destination_type: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = rfqs)]
pub struct Rfq {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub awarded_quote_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = rfqs)]
pub struct NewRfq {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = vendor_quotes)]
#[diesel(belongs_to(Rfq))]
pub struct VendorQuote {
    pub id: Uuid,
    pub rfq_id: Uuid,
    pub vendor_id: Uuid,
    pub vendor_name: String,
    pub vendor_email: Option<String>,
    pub unit_price: f64,
    pub total_price: f64,
    pub currency: String,
    pub lead_time_days: i32,
    pub ai_score: Option<f64>,
    pub status: String,
    pub price_rank: Option<i32>,
    pub lead_time_rank: Option<i32>,
    pub overall_score: Option<f64>,
    pub overall_rank: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = vendor_quotes)]
pub struct NewVendorQuote {
    pub id: Uuid,
    pub rfq_id: Uuid,
    pub vendor_id: Uuid,
    pub vendor_name: String,
    pub vendor_email: Option<String>,
    pub unit_price: f64,
    pub total_price: f64,
    pub currency: String,
    pub lead_time_days: i32,
    pub ai_score: Option<f64>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = approval_items)]
pub struct ApprovalItem {
    pub id: Uuid,
    pub approval_type: String,
    pub title: String,
    pub monetary_value: f64,
    pub currency: String,
    pub risk_assessment: String,
    pub ai_confidence: Option<f64>,
    pub status: String,
    pub requested_at: NaiveDateTime,
    pub escalated_at: Option<NaiveDateTime>,
    pub decided_at: Option<NaiveDateTime>,
    pub decided_by: Option<Uuid>,
    pub decision_note: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = approval_items)]
pub struct NewApprovalItem {
    pub id: Uuid,
    pub approval_type: String,
    pub title: String,
    pub monetary_value: f64,
    pub currency: String,
    pub risk_assessment: String,
    pub ai_confidence: Option<f64>,
    pub status: String,
    pub requested_at: NaiveDateTime,
    pub escalated_at: Option<NaiveDateTime>,
    pub decided_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = webhook_events)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub idempotency_key: String,
    pub source: String,
    pub topic: String,
    pub external_id: String,
    pub shop_domain: String,
    pub payload: serde_json::Value,
    pub received_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = webhook_events)]
pub struct NewWebhookEvent {
    pub id: Uuid,
    pub idempotency_key: String,
    pub source: String,
    pub topic: String,
    pub external_id: String,
    pub shop_domain: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = oauth_states)]
pub struct OAuthStateRow {
    pub state: String,
    pub provider: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = journal_entries)]
pub struct JournalEntry {
    pub id: Uuid,
    pub memo: String,
    pub entry_date: NaiveDate,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = journal_entries)]
pub struct NewJournalEntry {
    pub id: Uuid,
    pub memo: String,
    pub entry_date: NaiveDate,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = journal_lines)]
#[diesel(belongs_to(JournalEntry, foreign_key = entry_id))]
pub struct JournalLine {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub account_code: String,
    pub description: Option<String>,
    pub debit: f64,
    pub credit: f64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = journal_lines)]
pub struct NewJournalLine {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub account_code: String,
    pub description: Option<String>,
    pub debit: f64,
    pub credit: f64,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
