use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

#[derive(Debug, Clone)]
pub struct MessageAttachment {
    pub provider_attachment_id: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

#[derive(Debug, Clone)]
pub struct MailMessage {
    pub provider_message_id: String,
    pub sender_address: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub body_preview: String,
    pub received_at: NaiveDateTime,
    pub attachments: Vec<MessageAttachment>,
}

/// Inbox access (Gmail or similar). Implementations live outside this crate.
#[async_trait]
pub trait MailProvider: Send + Sync + 'static {
    /// Most recent messages that carry at least one attachment, newest first.
    async fn list_messages_with_attachments(&self, max_results: usize) -> Result<Vec<MailMessage>>;

    async fn fetch_attachment(
        &self,
        provider_message_id: &str,
        provider_attachment_id: &str,
    ) -> Result<Vec<u8>>;
}
