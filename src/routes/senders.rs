use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::filing::sender::{
    normalize_pattern, BlockReason, ListKind, PatternType, SenderMessage, SenderVerdict,
};
use crate::filing::SenderRuleSet;
use crate::models::{NewSenderRule, SenderRule};
use crate::schema::sender_rules;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListSendersQuery {
    pub list_kind: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateSenderRuleRequest {
    pub list_kind: String,
    pub pattern: String,
    pub pattern_type: String,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct ClassifySenderRequest {
    pub address: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Serialize)]
pub struct SenderRuleResponse {
    pub id: Uuid,
    pub list_kind: String,
    pub pattern: String,
    pub pattern_type: String,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl From<SenderRule> for SenderRuleResponse {
    fn from(rule: SenderRule) -> Self {
        Self {
            id: rule.id,
            list_kind: rule.list_kind,
            pattern: rule.pattern,
            pattern_type: rule.pattern_type,
            reason: rule.reason,
            notes: rule.notes,
        }
    }
}

pub async fn list_sender_rules(
    State(state): State<AppState>,
    Query(query): Query<ListSendersQuery>,
) -> AppResult<Json<Vec<SenderRuleResponse>>> {
    let mut conn = state.db()?;
    let mut statement = sender_rules::table
        .order((sender_rules::list_kind.asc(), sender_rules::pattern.asc()))
        .into_boxed();
    if let Some(kind) = query.list_kind.as_deref() {
        let kind: ListKind = kind.parse().map_err(AppError::bad_request)?;
        statement = statement.filter(sender_rules::list_kind.eq(kind.as_str()));
    }

    let rules: Vec<SenderRule> = statement.load(&mut conn)?;
    Ok(Json(rules.into_iter().map(SenderRuleResponse::from).collect()))
}

pub async fn create_sender_rule(
    State(state): State<AppState>,
    Json(payload): Json<CreateSenderRuleRequest>,
) -> AppResult<(StatusCode, Json<SenderRuleResponse>)> {
    let list_kind: ListKind = payload.list_kind.trim().parse().map_err(AppError::bad_request)?;
    let pattern_type: PatternType = payload
        .pattern_type
        .trim()
        .parse()
        .map_err(AppError::bad_request)?;
    let pattern = normalize_pattern(pattern_type, &payload.pattern).map_err(AppError::bad_request)?;

    let reason = match (list_kind, payload.reason.as_deref().map(str::trim)) {
        (ListKind::Trusted, None) => None,
        (ListKind::Trusted, Some(_)) => {
            return Err(AppError::bad_request("only blocked senders carry a reason"))
        }
        (ListKind::Blocked, None) => Some(BlockReason::Spam),
        (ListKind::Blocked, Some(raw)) => {
            Some(raw.parse::<BlockReason>().map_err(AppError::bad_request)?)
        }
    };

    let new_rule = NewSenderRule {
        id: Uuid::new_v4(),
        list_kind: list_kind.as_str().to_string(),
        pattern,
        pattern_type: pattern_type.as_str().to_string(),
        reason: reason.map(|reason| reason.as_str().to_string()),
        notes: payload
            .notes
            .map(|notes| notes.trim().to_string())
            .filter(|notes| !notes.is_empty()),
    };

    let mut conn = state.db()?;
    let created: SenderRule = match diesel::insert_into(sender_rules::table)
        .values(&new_rule)
        .get_result(&mut conn)
    {
        Ok(rule) => rule,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict("sender rule already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    tracing::info!(
        rule_id = %created.id,
        list_kind = %created.list_kind,
        pattern_type = %created.pattern_type,
        "sender rule created"
    );
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn delete_sender_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(sender_rules::table.find(rule_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Dry-run of the sender classifier against the stored lists.
pub async fn classify_sender(
    State(state): State<AppState>,
    Json(payload): Json<ClassifySenderRequest>,
) -> AppResult<Json<SenderVerdict>> {
    if payload.address.trim().is_empty() {
        return Err(AppError::bad_request("address must not be empty"));
    }

    let mut conn = state.db()?;
    let rules: Vec<SenderRule> = sender_rules::table.load(&mut conn)?;
    let rule_set = SenderRuleSet::compile(&rules);

    Ok(Json(rule_set.classify(&SenderMessage {
        address: &payload.address,
        subject: &payload.subject,
        body: &payload.body,
    })))
}
