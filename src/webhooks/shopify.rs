use std::collections::HashMap;

use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::WebhookEventStore;
use crate::models::NewWebhookEvent;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_HMAC: &str = "x-shopify-hmac-sha256";
pub const HEADER_SHOP_DOMAIN: &str = "x-shopify-shop-domain";
pub const HEADER_TOPIC: &str = "x-shopify-topic";

const SOURCE: &str = "shopify";

/// One delivery as received on the wire.
#[derive(Debug, Clone, Copy)]
pub struct ShopifyDelivery<'a> {
    pub shop_domain: Option<&'a str>,
    pub topic: Option<&'a str>,
    pub hmac: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub should_process: bool,
    pub idempotency_key: String,
}

#[derive(Debug, Error)]
pub enum WebhookRejection {
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("unknown shop {0}")]
    UnknownShop(String),
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("invalid JSON payload: {0}")]
    InvalidPayload(String),
    #[error("payload has no id")]
    MissingId,
    #[error("failed to record webhook: {0}")]
    Store(String),
}

impl WebhookRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHeader(HEADER_HMAC) | Self::UnknownShop(_) | Self::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            Self::MissingHeader(_) | Self::InvalidPayload(_) | Self::MissingId => {
                StatusCode::BAD_REQUEST
            }
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Constant-time check of a base64 HMAC-SHA256 over the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature_b64: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature_b64.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub fn idempotency_key(topic: &str, external_id: &str) -> String {
    format!("{SOURCE}-{topic}-{external_id}")
}

fn external_id(payload: &Value) -> Option<String> {
    match payload.get("id")? {
        Value::Number(number) => Some(number.to_string()),
        Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

/// Authenticates a delivery and records it once. Nothing is written for a rejected delivery.
pub async fn receive(
    secrets: &HashMap<String, String>,
    store: &dyn WebhookEventStore,
    delivery: ShopifyDelivery<'_>,
) -> Result<WebhookOutcome, WebhookRejection> {
    let shop_domain = delivery
        .shop_domain
        .map(|shop| shop.trim().to_ascii_lowercase())
        .filter(|shop| !shop.is_empty())
        .ok_or(WebhookRejection::MissingHeader(HEADER_SHOP_DOMAIN))?;
    let signature = delivery
        .hmac
        .filter(|value| !value.trim().is_empty())
        .ok_or(WebhookRejection::MissingHeader(HEADER_HMAC))?;
    let secret = secrets
        .get(&shop_domain)
        .ok_or_else(|| WebhookRejection::UnknownShop(shop_domain.clone()))?;

    if !verify_signature(secret, delivery.body, signature) {
        warn!(shop = %shop_domain, "rejected webhook with bad signature");
        return Err(WebhookRejection::InvalidSignature);
    }

    let topic = delivery
        .topic
        .map(str::trim)
        .filter(|topic| !topic.is_empty())
        .ok_or(WebhookRejection::MissingHeader(HEADER_TOPIC))?;
    let payload: Value = serde_json::from_slice(delivery.body)
        .map_err(|err| WebhookRejection::InvalidPayload(err.to_string()))?;
    let external_id = external_id(&payload).ok_or(WebhookRejection::MissingId)?;
    let key = idempotency_key(topic, &external_id);

    let inserted = store
        .record(NewWebhookEvent {
            id: Uuid::new_v4(),
            idempotency_key: key.clone(),
            source: SOURCE.to_string(),
            topic: topic.to_string(),
            external_id,
            shop_domain: shop_domain.clone(),
            payload,
        })
        .await
        .map_err(|err| WebhookRejection::Store(format!("{err:#}")))?;

    if inserted {
        info!(shop = %shop_domain, %key, "webhook accepted");
    } else {
        info!(shop = %shop_domain, %key, "duplicate webhook ignored");
    }

    Ok(WebhookOutcome {
        should_process: inserted,
        idempotency_key: key,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    const SHOP: &str = "acme.myshopify.com";
    const SECRET: &str = "shpss_test_secret";

    #[derive(Default)]
    struct MemoryStore {
        keys: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl WebhookEventStore for MemoryStore {
        async fn record(&self, event: NewWebhookEvent) -> anyhow::Result<bool> {
            Ok(self.keys.lock().unwrap().insert(event.idempotency_key))
        }
    }

    fn sign(body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    fn secrets() -> HashMap<String, String> {
        HashMap::from([(SHOP.to_string(), SECRET.to_string())])
    }

    fn delivery<'a>(body: &'a [u8], hmac: Option<&'a str>) -> ShopifyDelivery<'a> {
        ShopifyDelivery {
            shop_domain: Some("Acme.myshopify.com"),
            topic: Some("orders/create"),
            hmac,
            body,
        }
    }

    #[test]
    fn signature_round_trip() {
        let body = br#"{"id":1}"#;
        assert!(verify_signature(SECRET, body, &sign(body)));
        assert!(!verify_signature(SECRET, br#"{"id":2}"#, &sign(body)));
        assert!(!verify_signature(SECRET, body, "not base64!"));
    }

    #[tokio::test]
    async fn duplicate_delivery_is_not_processed_again() {
        let store = MemoryStore::default();
        let body = br#"{"id":12345,"total_price":"10.00"}"#;
        let signature = sign(body);

        let first = receive(&secrets(), &store, delivery(body, Some(&signature)))
            .await
            .unwrap();
        assert!(first.should_process);
        assert_eq!(first.idempotency_key, "shopify-orders/create-12345");

        let second = receive(&secrets(), &store, delivery(body, Some(&signature)))
            .await
            .unwrap();
        assert!(!second.should_process);
        assert_eq!(store.keys.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized_and_records_nothing() {
        let store = MemoryStore::default();
        let body = br#"{"id":1}"#;
        let forged = sign(br#"{"id":2}"#);

        let err = receive(&secrets(), &store, delivery(body, Some(&forged)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = receive(&secrets(), &store, delivery(body, None))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert!(store.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_shop_is_rejected() {
        let store = MemoryStore::default();
        let body = br#"{"id":1}"#;
        let signature = sign(body);
        let delivery = ShopifyDelivery {
            shop_domain: Some("other.myshopify.com"),
            ..delivery(body, Some(&signature))
        };
        let err = receive(&secrets(), &store, delivery).await.unwrap_err();
        assert!(matches!(err, WebhookRejection::UnknownShop(_)));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_payloads_are_bad_requests() {
        let store = MemoryStore::default();
        for body in [&b"not json"[..], &br#"{"name":"no id"}"#[..]] {
            let signature = sign(body);
            let err = receive(&secrets(), &store, delivery(body, Some(&signature)))
                .await
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
        assert!(store.keys.lock().unwrap().is_empty());
    }
}
