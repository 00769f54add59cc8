use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::state::AppState;
use crate::webhooks::shopify::{self, HEADER_HMAC, HEADER_SHOP_DOMAIN, HEADER_TOPIC};
use crate::webhooks::ShopifyDelivery;

/// Signature-checked, idempotent Shopify intake. Always answers with `should_process`.
pub async fn shopify_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let delivery = ShopifyDelivery {
        shop_domain: header(&headers, HEADER_SHOP_DOMAIN),
        topic: header(&headers, HEADER_TOPIC),
        hmac: header(&headers, HEADER_HMAC),
        body: &body,
    };

    match shopify::receive(
        &state.config.shopify_webhook_secrets,
        state.webhook_events.as_ref(),
        delivery,
    )
    .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "should_process": outcome.should_process,
                "idempotency_key": outcome.idempotency_key,
            })),
        ),
        Err(rejection) => {
            let status = rejection.status();
            if status.is_server_error() {
                tracing::error!(error = %rejection, "webhook intake failed");
            } else {
                tracing::warn!(error = %rejection, "webhook rejected");
            }
            (
                status,
                Json(json!({
                    "should_process": false,
                    "error": rejection.to_string(),
                })),
            )
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
