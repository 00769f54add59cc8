mod common;

use anyhow::Result;
use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{acquire_db_lock, body_json, TestApp, SHOP_DOMAIN, SHOP_SECRET};
use diesel::prelude::*;
use hmac::{Hmac, Mac};
use opsdesk::schema::webhook_events;
use sha2::Sha256;

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

fn headers(shop: &str, topic: &str, signature: String) -> Vec<(&'static str, String)> {
    vec![
        ("x-shopify-shop-domain", shop.to_string()),
        ("x-shopify-topic", topic.to_string()),
        ("x-shopify-hmac-sha256", signature),
    ]
}

async fn stored_events(app: &TestApp) -> Result<i64> {
    app.with_conn(|conn| Ok(webhook_events::table.count().get_result(conn)?))
        .await
}

#[tokio::test]
async fn signed_deliveries_are_recorded_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let body = br#"{"id": 820982911946154500, "email": "jon@example.com"}"#.to_vec();
    let signature = sign(SHOP_SECRET, &body);

    let first = app
        .post_raw(
            "/api/webhooks/shopify",
            body.clone(),
            &headers(SHOP_DOMAIN, "orders/create", signature.clone()),
        )
        .await?;
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_json(first).await?;
    assert_eq!(first["should_process"], true);
    assert_eq!(
        first["idempotency_key"],
        "shopify-orders/create-820982911946154500"
    );

    let replay = app
        .post_raw(
            "/api/webhooks/shopify",
            body,
            &headers(SHOP_DOMAIN, "orders/create", signature),
        )
        .await?;
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(body_json(replay).await?["should_process"], false);
    assert_eq!(stored_events(&app).await?, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn forged_or_malformed_deliveries_are_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let body = br#"{"id": 42}"#.to_vec();

    let forged = app
        .post_raw(
            "/api/webhooks/shopify",
            body.clone(),
            &headers(SHOP_DOMAIN, "orders/create", sign("wrong-secret", &body)),
        )
        .await?;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(forged).await?["should_process"], false);

    let unknown_shop = app
        .post_raw(
            "/api/webhooks/shopify",
            body.clone(),
            &headers("other.myshopify.com", "orders/create", sign(SHOP_SECRET, &body)),
        )
        .await?;
    assert_eq!(unknown_shop.status(), StatusCode::UNAUTHORIZED);

    let no_id = br#"{"email": "jon@example.com"}"#.to_vec();
    let missing_id = app
        .post_raw(
            "/api/webhooks/shopify",
            no_id.clone(),
            &headers(SHOP_DOMAIN, "orders/create", sign(SHOP_SECRET, &no_id)),
        )
        .await?;
    assert_eq!(missing_id.status(), StatusCode::BAD_REQUEST);

    let not_json = b"id=42".to_vec();
    let invalid = app
        .post_raw(
            "/api/webhooks/shopify",
            not_json.clone(),
            &headers(SHOP_DOMAIN, "orders/create", sign(SHOP_SECRET, &not_json)),
        )
        .await?;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    assert_eq!(stored_events(&app).await?, 0);

    app.cleanup().await?;
    Ok(())
}
