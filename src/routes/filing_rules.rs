use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::filing::rules::validate_template;
use crate::filing::{DestinationType, DocumentCategory};
use crate::models::{FilingRule, NewFilingRule};
use crate::schema::filing_rules;
use crate::state::AppState;
use crate::utils::json::{patch_field, PatchField};

#[derive(Deserialize)]
pub struct CreateFilingRuleRequest {
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    pub document_category: Option<String>,
    pub vendor_pattern: Option<String>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub destination_type: String,
    pub path_template: String,
}

fn default_priority() -> i32 {
    100
}

fn default_enabled() -> bool {
    true
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = filing_rules)]
struct UpdateFilingRuleChangeset {
    name: Option<String>,
    priority: Option<i32>,
    is_enabled: Option<bool>,
    document_category: Option<Option<String>>,
    vendor_pattern: Option<Option<String>>,
    min_amount: Option<Option<f64>>,
    max_amount: Option<Option<f64>>,
    destination_type: Option<String>,
    path_template: Option<String>,
    updated_at: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct FilingRuleResponse {
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
}

impl From<FilingRule> for FilingRuleResponse {
    fn from(rule: FilingRule) -> Self {
        Self {
            id: rule.id,
            name: rule.name,
            priority: rule.priority,
            is_enabled: rule.is_enabled,
            document_category: rule.document_category,
            vendor_pattern: rule.vendor_pattern,
            min_amount: rule.min_amount,
            max_amount: rule.max_amount,
            destination_type: rule.destination_type,
            path_template: rule.path_template,
            times_matched: rule.times_matched,
            last_matched_at: rule.last_matched_at,
        }
    }
}

pub async fn list_filing_rules(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<FilingRuleResponse>>> {
    let mut conn = state.db()?;
    let rules: Vec<FilingRule> = filing_rules::table
        .order((
            filing_rules::priority.asc(),
            filing_rules::name.asc(),
            filing_rules::id.asc(),
        ))
        .load(&mut conn)?;
    Ok(Json(rules.into_iter().map(FilingRuleResponse::from).collect()))
}

pub async fn create_filing_rule(
    State(state): State<AppState>,
    Json(payload): Json<CreateFilingRuleRequest>,
) -> AppResult<(StatusCode, Json<FilingRuleResponse>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    let destination_type = parse_destination(&payload.destination_type)?;
    validate_template(&payload.path_template).map_err(AppError::bad_request)?;
    let document_category = payload
        .document_category
        .as_deref()
        .map(parse_category)
        .transpose()?;
    check_amount_bounds(payload.min_amount, payload.max_amount)?;

    let new_rule = NewFilingRule {
        id: Uuid::new_v4(),
        name: name.to_string(),
        priority: payload.priority,
        is_enabled: payload.is_enabled,
        document_category: document_category.map(|category| category.as_str().to_string()),
        vendor_pattern: payload
            .vendor_pattern
            .map(|pattern| pattern.trim().to_string())
            .filter(|pattern| !pattern.is_empty()),
        min_amount: payload.min_amount,
        max_amount: payload.max_amount,
        destination_type: destination_type.as_str().to_string(),
        path_template: payload.path_template.trim().to_string(),
    };

    let mut conn = state.db()?;
    let created: FilingRule = diesel::insert_into(filing_rules::table)
        .values(&new_rule)
        .get_result(&mut conn)?;

    tracing::info!(rule_id = %created.id, priority = created.priority, "filing rule created");
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn update_filing_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<FilingRuleResponse>> {
    let Value::Object(body) = body else {
        return Err(AppError::bad_request("expected a JSON object"));
    };
    let mut conn = state.db()?;
    let existing: FilingRule = filing_rules::table.find(rule_id).first(&mut conn)?;

    let mut changeset = UpdateFilingRuleChangeset::default();

    match patch_field::<String>(&body, "name").map_err(AppError::bad_request)? {
        PatchField::Omitted => {}
        PatchField::Null => return Err(AppError::bad_request("name cannot be null")),
        PatchField::Set(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("name must not be empty"));
            }
            changeset.name = Some(trimmed.to_string());
        }
    }

    match patch_field::<i32>(&body, "priority").map_err(AppError::bad_request)? {
        PatchField::Null => return Err(AppError::bad_request("priority cannot be null")),
        field => changeset.priority = field.into_nullable().flatten(),
    }

    match patch_field::<bool>(&body, "is_enabled").map_err(AppError::bad_request)? {
        PatchField::Null => return Err(AppError::bad_request("is_enabled cannot be null")),
        field => changeset.is_enabled = field.into_nullable().flatten(),
    }

    changeset.document_category = patch_field::<String>(&body, "document_category")
        .map_err(AppError::bad_request)?
        .into_nullable()
        .map(|category| {
            category
                .map(|raw| parse_category(&raw).map(|category| category.as_str().to_string()))
                .transpose()
        })
        .transpose()?;

    changeset.vendor_pattern = patch_field::<String>(&body, "vendor_pattern")
        .map_err(AppError::bad_request)?
        .into_nullable()
        .map(|pattern| {
            pattern
                .map(|raw| raw.trim().to_string())
                .filter(|trimmed| !trimmed.is_empty())
        });

    changeset.min_amount = amount_patch(&body, "min_amount")?;
    changeset.max_amount = amount_patch(&body, "max_amount")?;
    let min_amount = changeset.min_amount.unwrap_or(existing.min_amount);
    let max_amount = changeset.max_amount.unwrap_or(existing.max_amount);
    check_amount_bounds(min_amount, max_amount)?;

    match patch_field::<String>(&body, "destination_type").map_err(AppError::bad_request)? {
        PatchField::Omitted => {}
        PatchField::Null => {
            return Err(AppError::bad_request("destination_type cannot be null"))
        }
        PatchField::Set(value) => {
            changeset.destination_type = Some(parse_destination(&value)?.as_str().to_string());
        }
    }

    match patch_field::<String>(&body, "path_template").map_err(AppError::bad_request)? {
        PatchField::Omitted => {}
        PatchField::Null => return Err(AppError::bad_request("path_template cannot be null")),
        PatchField::Set(value) => {
            validate_template(&value).map_err(AppError::bad_request)?;
            changeset.path_template = Some(value.trim().to_string());
        }
    }

    changeset.updated_at = Some(Utc::now().naive_utc());
    let updated: FilingRule = diesel::update(filing_rules::table.find(rule_id))
        .set(&changeset)
        .get_result(&mut conn)?;

    Ok(Json(updated.into()))
}

pub async fn delete_filing_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(filing_rules::table.find(rule_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

fn parse_destination(raw: &str) -> AppResult<DestinationType> {
    let destination: DestinationType = raw.trim().parse().map_err(AppError::bad_request)?;
    if destination == DestinationType::Pending {
        return Err(AppError::bad_request(
            "`pending` is not a valid rule destination",
        ));
    }
    Ok(destination)
}

fn parse_category(raw: &str) -> AppResult<DocumentCategory> {
    raw.trim().parse().map_err(AppError::bad_request)
}

fn amount_patch(body: &Map<String, Value>, field: &str) -> AppResult<Option<Option<f64>>> {
    let amount = patch_field::<f64>(body, field)
        .map_err(AppError::bad_request)?
        .into_nullable();
    if amount.flatten().is_some_and(|value| !value.is_finite() || value < 0.0) {
        return Err(AppError::bad_request(format!(
            "{field} must be a non-negative number"
        )));
    }
    Ok(amount)
}

fn check_amount_bounds(min: Option<f64>, max: Option<f64>) -> AppResult<()> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(AppError::bad_request(
                "min_amount must not exceed max_amount",
            ));
        }
    }
    Ok(())
}
