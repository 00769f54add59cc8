mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, TestApp};
use opsdesk::jobs::{JobStatus, JOB_NOTIFY_VENDOR};
use opsdesk::{default_handlers, Worker};
use serde_json::{json, Value};

async fn add_quote(
    app: &TestApp,
    token: &str,
    rfq_id: &str,
    vendor: &str,
    total_price: f64,
    lead_time_days: i32,
    ai_score: Option<f64>,
) -> Result<Value> {
    let response = app
        .post_json(
            &format!("/api/rfqs/{rfq_id}/quotes"),
            &json!({
                "vendor_name": vendor,
                "vendor_email": format!("sales@{}.example", vendor.to_lowercase()),
                "unit_price": total_price / 10.0,
                "total_price": total_price,
                "lead_time_days": lead_time_days,
                "ai_score": ai_score,
            }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn quotes_are_ranked_and_the_best_one_is_awarded() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.operator_token("buyer")?;

    let rfq = app
        .post_json(
            "/api/rfqs",
            &json!({ "title": "Pallet wrap, 40 rolls" }),
            Some(&token),
        )
        .await?;
    assert_eq!(rfq.status(), StatusCode::CREATED);
    let rfq = body_json(rfq).await?;
    let rfq_id = rfq["id"].as_str().unwrap().to_string();
    assert_eq!(rfq["status"], "open");

    let globex = add_quote(&app, &token, &rfq_id, "Globex", 1200.0, 10, None).await?;
    let initech = add_quote(&app, &token, &rfq_id, "Initech", 1000.0, 5, Some(0.9)).await?;
    let umbrella = add_quote(&app, &token, &rfq_id, "Umbrella", 1100.0, 20, None).await?;

    let detail = body_json(app.get(&format!("/api/rfqs/{rfq_id}"), Some(&token)).await?).await?;
    let quotes = detail["quotes"].as_array().unwrap();
    assert_eq!(quotes.len(), 3);
    assert_eq!(quotes[0]["id"], initech["id"]);
    assert_eq!(quotes[0]["overall_rank"], 1);
    let price_rank = |id: &Value| {
        quotes
            .iter()
            .find(|quote| quote["id"] == *id)
            .map(|quote| quote["price_rank"].clone())
    };
    assert_eq!(price_rank(&globex["id"]), Some(json!(3)));
    assert_eq!(price_rank(&initech["id"]), Some(json!(1)));
    assert_eq!(price_rank(&umbrella["id"]), Some(json!(2)));

    let invalid = app
        .patch_json(
            &format!("/api/quotes/{}", globex["id"].as_str().unwrap()),
            &json!({ "status": "accepted" }),
            Some(&token),
        )
        .await?;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    let award = app
        .post_json(&format!("/api/rfqs/{rfq_id}/award"), &json!({}), Some(&token))
        .await?;
    assert_eq!(award.status(), StatusCode::OK);
    let award = body_json(award).await?;
    assert_eq!(award["awarded_quote_id"], initech["id"]);
    assert_eq!(award["rejected_quote_ids"].as_array().unwrap().len(), 2);
    assert_eq!(award["notifications_queued"], 3);

    let detail = body_json(app.get(&format!("/api/rfqs/{rfq_id}"), Some(&token)).await?).await?;
    assert_eq!(detail["status"], "awarded");
    assert_eq!(detail["awarded_quote_id"], initech["id"]);
    for quote in detail["quotes"].as_array().unwrap() {
        let expected = if quote["id"] == initech["id"] {
            "accepted"
        } else {
            "rejected"
        };
        assert_eq!(quote["status"], expected);
    }

    let late = app
        .post_json(
            &format!("/api/rfqs/{rfq_id}/quotes"),
            &json!({
                "vendor_name": "Late Co",
                "unit_price": 90.0,
                "total_price": 900.0,
                "lead_time_days": 3,
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(late.status(), StatusCode::CONFLICT);

    let again = app
        .post_json(&format!("/api/rfqs/{rfq_id}/award"), &json!({}), Some(&token))
        .await?;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let worker = Worker::new(
        Arc::new(app.state.clone()),
        default_handlers(),
        Duration::from_millis(10),
    );
    while worker.tick().await? {}

    let jobs = app.jobs_by_type(JOB_NOTIFY_VENDOR).await?;
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|job| job.status == JobStatus::Succeeded.as_str()));

    let sent = app.notifier().sent().await;
    assert_eq!(sent.len(), 3);
    assert_eq!(
        sent.iter()
            .filter(|message| message.contains("Initech"))
            .count(),
        1
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn awarding_without_received_quotes_is_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.operator_token("buyer")?;

    let rfq = body_json(
        app.post_json("/api/rfqs", &json!({ "title": "Forklift service" }), Some(&token))
            .await?,
    )
    .await?;
    let rfq_id = rfq["id"].as_str().unwrap().to_string();

    let award = app
        .post_json(&format!("/api/rfqs/{rfq_id}/award"), &json!({}), Some(&token))
        .await?;
    assert_eq!(award.status(), StatusCode::BAD_REQUEST);

    let missing = app
        .post_json(
            &format!("/api/rfqs/{}/award", uuid::Uuid::new_v4()),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}
