//! Double-entry journal entries.

use chrono::NaiveDate;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{JournalEntry, JournalLine, NewJournalEntry, NewJournalLine};
use crate::schema::{journal_entries, journal_lines};

/// Largest accepted difference between total debits and total credits.
pub const BALANCE_TOLERANCE: f64 = 0.01;
const FLOAT_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, Deserialize)]
pub struct JournalLineInput {
    pub account_code: String,
    pub description: Option<String>,
    #[serde(default)]
    pub debit: f64,
    #[serde(default)]
    pub credit: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalEntryInput {
    pub memo: String,
    pub entry_date: NaiveDate,
    pub lines: Vec<JournalLineInput>,
}

#[derive(Debug, Serialize)]
pub struct PostedEntry {
    pub id: Uuid,
    pub memo: String,
    pub entry_date: NaiveDate,
    pub lines: Vec<PostedLine>,
}

#[derive(Debug, Serialize)]
pub struct PostedLine {
    pub id: Uuid,
    pub account_code: String,
    pub description: Option<String>,
    pub debit: f64,
    pub credit: f64,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("a journal entry needs at least two lines, got {0}")]
    TooFewLines(usize),
    #[error("line {0} has no account code")]
    MissingAccount(usize),
    #[error("line {0} must have exactly one positive debit or credit")]
    InvalidLineAmounts(usize),
    #[error("entry is unbalanced: debits {debits:.2} != credits {credits:.2}")]
    Unbalanced { debits: f64, credits: f64 },
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

impl From<LedgerError> for AppError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Database(err) => AppError::from(err),
            invalid => AppError::bad_request(invalid.to_string()),
        }
    }
}

pub fn validate_entry(input: &JournalEntryInput) -> Result<(), LedgerError> {
    if input.lines.len() < 2 {
        return Err(LedgerError::TooFewLines(input.lines.len()));
    }

    let mut debits = 0.0;
    let mut credits = 0.0;
    for (index, line) in input.lines.iter().enumerate() {
        let number = index + 1;
        if line.account_code.trim().is_empty() {
            return Err(LedgerError::MissingAccount(number));
        }
        let finite = line.debit.is_finite() && line.credit.is_finite();
        let one_sided = (line.debit > 0.0 && line.credit == 0.0)
            || (line.credit > 0.0 && line.debit == 0.0);
        if !finite || !one_sided {
            return Err(LedgerError::InvalidLineAmounts(number));
        }
        debits += line.debit;
        credits += line.credit;
    }

    if (debits - credits).abs() > BALANCE_TOLERANCE + FLOAT_SLACK {
        return Err(LedgerError::Unbalanced { debits, credits });
    }
    Ok(())
}

/// Validates, then writes the entry and its lines in one transaction.
pub fn post_entry(
    conn: &mut PgConnection,
    input: &JournalEntryInput,
) -> Result<PostedEntry, LedgerError> {
    validate_entry(input)?;

    conn.transaction(|conn| {
        let entry: JournalEntry = diesel::insert_into(journal_entries::table)
            .values(&NewJournalEntry {
                id: Uuid::new_v4(),
                memo: input.memo.trim().to_string(),
                entry_date: input.entry_date,
            })
            .get_result(conn)?;

        let new_lines: Vec<NewJournalLine> = input
            .lines
            .iter()
            .map(|line| NewJournalLine {
                id: Uuid::new_v4(),
                entry_id: entry.id,
                account_code: line.account_code.trim().to_string(),
                description: line.description.clone(),
                debit: line.debit,
                credit: line.credit,
            })
            .collect();
        let lines: Vec<JournalLine> = diesel::insert_into(journal_lines::table)
            .values(&new_lines)
            .get_results(conn)?;

        Ok(PostedEntry {
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
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(account: &str, debit: f64, credit: f64) -> JournalLineInput {
        JournalLineInput {
            account_code: account.into(),
            description: None,
            debit,
            credit,
        }
    }

    fn entry(lines: Vec<JournalLineInput>) -> JournalEntryInput {
        JournalEntryInput {
            memo: "Office supplies".into(),
            entry_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            lines,
        }
    }

    #[test]
    fn balanced_entry_is_valid() {
        let input = entry(vec![
            line("6100", 120.50, 0.0),
            line("2000", 0.0, 100.00),
            line("2100", 0.0, 20.50),
        ]);
        assert!(validate_entry(&input).is_ok());
    }

    #[test]
    fn rounding_within_a_cent_is_tolerated() {
        let input = entry(vec![line("6100", 100.00, 0.0), line("2000", 0.0, 99.99)]);
        assert!(validate_entry(&input).is_ok());

        let input = entry(vec![line("6100", 100.00, 0.0), line("2000", 0.0, 99.98)]);
        assert!(matches!(
            validate_entry(&input),
            Err(LedgerError::Unbalanced { .. })
        ));
    }

    #[test]
    fn needs_two_lines() {
        let input = entry(vec![line("6100", 10.0, 0.0)]);
        assert!(matches!(validate_entry(&input), Err(LedgerError::TooFewLines(1))));
    }

    #[test]
    fn each_line_has_exactly_one_positive_side() {
        for bad in [
            line("6100", 10.0, 10.0),
            line("6100", 0.0, 0.0),
            line("6100", -10.0, 0.0),
            line("6100", f64::NAN, 0.0),
        ] {
            let input = entry(vec![bad, line("2000", 0.0, 10.0)]);
            assert!(matches!(
                validate_entry(&input),
                Err(LedgerError::InvalidLineAmounts(1))
            ));
        }
    }

    #[test]
    fn account_code_is_required() {
        let input = entry(vec![line(" ", 10.0, 0.0), line("2000", 0.0, 10.0)]);
        assert!(matches!(validate_entry(&input), Err(LedgerError::MissingAccount(1))));
    }
}
