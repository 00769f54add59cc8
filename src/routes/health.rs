use axum::{extract::State, http::StatusCode, response::Json};
use diesel::{sql_query, RunQueryDsl};
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness plus a round trip to Postgres.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database_ok = state
        .db()
        .ok()
        .map(|mut conn| sql_query("SELECT 1").execute(&mut conn).is_ok())
        .unwrap_or(false);

    if database_ok {
        (StatusCode::OK, Json(json!({ "status": "ok", "database": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": "unavailable" })),
        )
    }
}
