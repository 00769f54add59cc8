use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::{post_entry, JournalEntryInput, PostedEntry, PostedLine};
use crate::models::{JournalEntry, JournalLine};
use crate::schema::{journal_entries, journal_lines};
use crate::state::AppState;

pub async fn create_journal_entry(
    State(state): State<AppState>,
    Json(payload): Json<JournalEntryInput>,
) -> AppResult<(StatusCode, Json<PostedEntry>)> {
    let mut conn = state.db()?;
    let entry = post_entry(&mut conn, &payload)?;
    tracing::info!(entry_id = %entry.id, lines = entry.lines.len(), "journal entry posted");
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn get_journal_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<PostedEntry>> {
    let mut conn = state.db()?;
    let entry: JournalEntry = journal_entries::table.find(entry_id).first(&mut conn)?;
    let lines: Vec<JournalLine> = journal_lines::table
        .filter(journal_lines::entry_id.eq(entry_id))
        .order(journal_lines::id.asc())
        .load(&mut conn)?;

    Ok(Json(PostedEntry {
        id: entry.id,
        memo: entry.memo,
        entry_date: entry.entry_date,
        lines: lines
            .into_iter()
            .map(|line| PostedLine {
                id: line.id,
                account_code: line.account_code,
                description: line.description,
                debit: line.debit,
                credit: line.credit,
            })
            .collect(),
    }))
}
