use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approvals::gate::open_statuses;
use crate::approvals::{
    bulk_approvable, decide, escalate_overdue, initial_status, ApprovalStatus, Decision,
    DecisionError, RiskAssessment,
};
use crate::auth::Operator;
use crate::error::{AppError, AppResult};
use crate::models::{ApprovalItem, NewApprovalItem};
use crate::schema::approval_items;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListApprovalsQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateApprovalRequest {
    pub approval_type: String,
    pub title: String,
    pub monetary_value: f64,
    pub currency: Option<String>,
    pub risk_assessment: String,
    pub ai_confidence: Option<f64>,
}

#[derive(Deserialize, Default)]
pub struct DecisionRequest {
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct BulkApproveRequest {
    pub ids: Option<Vec<Uuid>>,
}

#[derive(Serialize)]
pub struct ApprovalResponse {
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
}

impl From<ApprovalItem> for ApprovalResponse {
    fn from(item: ApprovalItem) -> Self {
        Self {
            id: item.id,
            approval_type: item.approval_type,
            title: item.title,
            monetary_value: item.monetary_value,
            currency: item.currency,
            risk_assessment: item.risk_assessment,
            ai_confidence: item.ai_confidence,
            status: item.status,
            requested_at: item.requested_at,
            escalated_at: item.escalated_at,
            decided_at: item.decided_at,
            decided_by: item.decided_by,
            decision_note: item.decision_note,
        }
    }
}

#[derive(Serialize)]
pub struct BulkApproveResponse {
    pub approved: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct EscalationResponse {
    pub escalated: Vec<Uuid>,
}

pub async fn list_approvals(
    State(state): State<AppState>,
    Query(query): Query<ListApprovalsQuery>,
) -> AppResult<Json<Vec<ApprovalResponse>>> {
    let mut conn = state.db()?;
    let mut statement = approval_items::table
        .order((approval_items::requested_at.asc(), approval_items::id.asc()))
        .into_boxed();
    if let Some(status) = query.status.as_deref() {
        let status: ApprovalStatus = status.parse().map_err(AppError::bad_request)?;
        statement = statement.filter(approval_items::status.eq(status.as_str()));
    }

    let items: Vec<ApprovalItem> = statement.load(&mut conn)?;
    Ok(Json(items.into_iter().map(ApprovalResponse::from).collect()))
}

pub async fn create_approval(
    State(state): State<AppState>,
    Json(payload): Json<CreateApprovalRequest>,
) -> AppResult<(StatusCode, Json<ApprovalResponse>)> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    if payload.approval_type.trim().is_empty() {
        return Err(AppError::bad_request("approval_type must not be empty"));
    }
    if !payload.monetary_value.is_finite() || payload.monetary_value < 0.0 {
        return Err(AppError::bad_request(
            "monetary_value must be a non-negative number",
        ));
    }
    let risk: RiskAssessment = payload
        .risk_assessment
        .trim()
        .parse()
        .map_err(AppError::bad_request)?;

    let now = Utc::now().naive_utc();
    let status = initial_status(risk, payload.monetary_value, state.config.auto_approve_threshold);
    let new_item = NewApprovalItem {
        id: Uuid::new_v4(),
        approval_type: payload.approval_type.trim().to_string(),
        title: title.to_string(),
        monetary_value: payload.monetary_value,
        currency: payload
            .currency
            .map(|code| code.trim().to_ascii_uppercase())
            .unwrap_or_else(|| "USD".to_string()),
        risk_assessment: risk.as_str().to_string(),
        ai_confidence: payload.ai_confidence,
        status: status.as_str().to_string(),
        requested_at: now,
        escalated_at: (status == ApprovalStatus::Escalated).then_some(now),
        decided_at: (status == ApprovalStatus::AutoApproved).then_some(now),
    };

    let mut conn = state.db()?;
    let item: ApprovalItem = diesel::insert_into(approval_items::table)
        .values(&new_item)
        .get_result(&mut conn)?;

    tracing::info!(
        approval_id = %item.id,
        risk = %risk,
        status = %status,
        "approval item created"
    );
    Ok((StatusCode::CREATED, Json(item.into())))
}

pub async fn approve_item(
    State(state): State<AppState>,
    operator: Operator,
    Path(item_id): Path<Uuid>,
    payload: Option<Json<DecisionRequest>>,
) -> AppResult<Json<ApprovalResponse>> {
    record_decision(&state, &operator, item_id, Decision::Approve, payload)
}

pub async fn reject_item(
    State(state): State<AppState>,
    operator: Operator,
    Path(item_id): Path<Uuid>,
    payload: Option<Json<DecisionRequest>>,
) -> AppResult<Json<ApprovalResponse>> {
    record_decision(&state, &operator, item_id, Decision::Reject, payload)
}

fn record_decision(
    state: &AppState,
    operator: &Operator,
    item_id: Uuid,
    decision: Decision,
    payload: Option<Json<DecisionRequest>>,
) -> AppResult<Json<ApprovalResponse>> {
    let note = payload
        .and_then(|Json(body)| body.note)
        .map(|note| note.trim().to_string())
        .filter(|note| !note.is_empty());

    let mut conn = state.db()?;
    let item = decide(
        &mut conn,
        item_id,
        decision,
        operator.operator_id,
        note,
        Utc::now().naive_utc(),
    )?;

    tracing::info!(
        approval_id = %item.id,
        operator = %operator.name,
        status = %item.status,
        "approval decided"
    );
    Ok(Json(item.into()))
}

/// Approves open low-risk items below the auto-approval threshold; everything else is reported as skipped.
pub async fn bulk_approve(
    State(state): State<AppState>,
    operator: Operator,
    Json(payload): Json<BulkApproveRequest>,
) -> AppResult<Json<BulkApproveResponse>> {
    let mut conn = state.db()?;
    let mut statement = approval_items::table
        .filter(approval_items::status.eq_any(open_statuses()))
        .into_boxed();
    if let Some(ids) = payload.ids.as_ref() {
        statement = statement.filter(approval_items::id.eq_any(ids.clone()));
    }
    let candidates: Vec<ApprovalItem> = statement.load(&mut conn)?;

    let threshold = state.config.auto_approve_threshold;
    let now = Utc::now().naive_utc();
    let mut approved = Vec::new();
    let mut skipped: Vec<Uuid> = payload
        .ids
        .as_ref()
        .map(|ids| {
            ids.iter()
                .filter(|id| !candidates.iter().any(|item| item.id == **id))
                .copied()
                .collect()
        })
        .unwrap_or_default();

    for item in candidates {
        if !bulk_approvable(&item, threshold) {
            skipped.push(item.id);
            continue;
        }
        match decide(
            &mut conn,
            item.id,
            Decision::Approve,
            operator.operator_id,
            Some("bulk approved".to_string()),
            now,
        ) {
            Ok(updated) => approved.push(updated.id),
            Err(DecisionError::AlreadyDecided(_)) | Err(DecisionError::NotFound) => {
                skipped.push(item.id)
            }
            Err(err) => return Err(err.into()),
        }
    }

    tracing::info!(
        operator = %operator.name,
        approved = approved.len(),
        skipped = skipped.len(),
        "bulk approval finished"
    );
    Ok(Json(BulkApproveResponse { approved, skipped }))
}

pub async fn escalate_approvals(
    State(state): State<AppState>,
) -> AppResult<Json<EscalationResponse>> {
    let mut conn = state.db()?;
    let escalated = escalate_overdue(
        &mut conn,
        state.config.approval_escalation_hours,
        Utc::now().naive_utc(),
    )?;
    Ok(Json(EscalationResponse {
        escalated: escalated.into_iter().map(|item| item.id).collect(),
    }))
}
