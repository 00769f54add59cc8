use chrono::{Duration, NaiveDateTime};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use super::{ApprovalStatus, RiskAssessment};
use crate::error::AppError;
use crate::models::ApprovalItem;
use crate::schema::approval_items;

/// Low risk and strictly below the threshold.
pub fn should_auto_approve(risk: RiskAssessment, monetary_value: f64, threshold: f64) -> bool {
    risk == RiskAssessment::Low && monetary_value < threshold
}

/// Status a new approval item starts in.
pub fn initial_status(risk: RiskAssessment, monetary_value: f64, threshold: f64) -> ApprovalStatus {
    if should_auto_approve(risk, monetary_value, threshold) {
        ApprovalStatus::AutoApproved
    } else if risk == RiskAssessment::Critical {
        ApprovalStatus::Escalated
    } else {
        ApprovalStatus::Pending
    }
}

/// Whether bulk approval may act on an item; high and critical risk never qualify.
pub fn bulk_approvable(item: &ApprovalItem, threshold: f64) -> bool {
    let open = matches!(
        item.status.parse::<ApprovalStatus>(),
        Ok(ApprovalStatus::Pending | ApprovalStatus::Escalated)
    );
    let Ok(risk) = item.risk_assessment.parse::<RiskAssessment>() else {
        return false;
    };
    open && should_auto_approve(risk, item.monetary_value, threshold)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub const fn status(&self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Reject => ApprovalStatus::Rejected,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("approval item not found")]
    NotFound,
    #[error("approval item is already {0}")]
    AlreadyDecided(String),
}

impl From<DecisionError> for AppError {
    fn from(value: DecisionError) -> Self {
        match value {
            DecisionError::NotFound => AppError::not_found(),
            DecisionError::AlreadyDecided(_) => AppError::conflict(value.to_string()),
            DecisionError::Database(err) => AppError::from(err),
        }
    }
}

/// Approves or rejects an open item. The status filter makes concurrent decisions race-safe.
pub fn decide(
    conn: &mut PgConnection,
    item_id: Uuid,
    decision: Decision,
    decided_by: Uuid,
    note: Option<String>,
    now: NaiveDateTime,
) -> Result<ApprovalItem, DecisionError> {
    let updated: Option<ApprovalItem> = diesel::update(
        approval_items::table
            .filter(approval_items::id.eq(item_id))
            .filter(approval_items::status.eq_any(open_statuses())),
    )
    .set((
        approval_items::status.eq(decision.status().as_str()),
        approval_items::decided_at.eq(Some(now)),
        approval_items::decided_by.eq(Some(decided_by)),
        approval_items::decision_note.eq(note),
        approval_items::updated_at.eq(now),
    ))
    .get_result(conn)
    .optional()?;

    if let Some(item) = updated {
        return Ok(item);
    }

    let current: Option<ApprovalItem> = approval_items::table
        .find(item_id)
        .first(conn)
        .optional()?;
    match current {
        Some(item) => Err(DecisionError::AlreadyDecided(item.status)),
        None => Err(DecisionError::NotFound),
    }
}

/// Moves `pending` items requested more than `after_hours` ago to `escalated`.
pub fn escalate_overdue(
    conn: &mut PgConnection,
    after_hours: i64,
    now: NaiveDateTime,
) -> QueryResult<Vec<ApprovalItem>> {
    let cutoff = now - Duration::hours(after_hours);
    diesel::update(
        approval_items::table
            .filter(approval_items::status.eq(ApprovalStatus::Pending.as_str()))
            .filter(approval_items::requested_at.lt(cutoff)),
    )
    .set((
        approval_items::status.eq(ApprovalStatus::Escalated.as_str()),
        approval_items::escalated_at.eq(Some(now)),
        approval_items::updated_at.eq(now),
    ))
    .get_results(conn)
}

pub fn open_statuses() -> [&'static str; 2] {
    [
        ApprovalStatus::Pending.as_str(),
        ApprovalStatus::Escalated.as_str(),
    ]
}
