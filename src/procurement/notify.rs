use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::utils::money::format_currency;

/// Outbound channel for operator and vendor messages.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Posts `{"text": ...}` to a Google Chat style incoming webhook.
pub struct ChatWebhookNotifier {
    client: Client,
    url: String,
}

impl ChatWebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for ChatWebhookNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .context("notification webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("notification webhook returned {status}: {body}"));
        }
        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        info!(%text, "notification");
        Ok(())
    }
}

/// Payload of a `notify-vendor` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorNotice {
    pub rfq_id: Uuid,
    pub rfq_title: String,
    pub quote_id: Uuid,
    pub vendor_name: String,
    pub vendor_email: Option<String>,
    pub awarded: bool,
    pub total_price: f64,
    pub currency: String,
}

impl VendorNotice {
    pub fn message(&self) -> String {
        let amount = format_currency(self.total_price, &self.currency)
            .unwrap_or_else(|| format!("an unpriced amount in {}", self.currency));
        let recipient = match &self.vendor_email {
            Some(email) => format!("{} <{}>", self.vendor_name, email),
            None => self.vendor_name.clone(),
        };
        if self.awarded {
            format!(
                "{recipient}: your quote of {amount} for \"{}\" has been accepted.",
                self.rfq_title
            )
        } else {
            format!(
                "{recipient}: thank you for your quote of {amount} for \"{}\". Another vendor was selected.",
                self.rfq_title
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(awarded: bool) -> VendorNotice {
        VendorNotice {
            rfq_id: Uuid::new_v4(),
            rfq_title: "Steel beams".into(),
            quote_id: Uuid::new_v4(),
            vendor_name: "Acme Supplies".into(),
            vendor_email: Some("sales@acme.test".into()),
            awarded,
            total_price: 12000.0,
            currency: "USD".into(),
        }
    }

    #[test]
    fn award_message_names_vendor_and_amount() {
        assert_eq!(
            notice(true).message(),
            "Acme Supplies <sales@acme.test>: your quote of $12,000.00 for \"Steel beams\" has been accepted."
        );
    }

    #[test]
    fn rejection_message_is_distinct() {
        let message = notice(false).message();
        assert!(message.contains("Another vendor was selected"));
        assert!(message.contains("$12,000.00"));
    }

    #[test]
    fn unpriced_quotes_do_not_render_infinity() {
        let mut broken = notice(true);
        broken.total_price = f64::INFINITY;
        let message = broken.message();
        assert!(message.contains("an unpriced amount in USD"));
        assert!(!message.contains("inf"));
    }
}
