use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::notify::VendorNotice;
use super::ranking::{rank_quotes, QuoteRanking, RankInput};
use super::{QuoteStatus, RfqStatus};
use crate::error::AppError;
use crate::jobs::{enqueue_job, JOB_NOTIFY_VENDOR};
use crate::models::{Rfq, VendorQuote};
use crate::schema::{rfqs, vendor_quotes};

#[derive(Debug, Error)]
pub enum AwardError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("rfq {0} not found")]
    RfqNotFound(Uuid),
    #[error("quote {0} does not belong to this rfq")]
    QuoteNotFound(Uuid),
    #[error("rfq is {0}; only open rfqs can be awarded")]
    RfqNotOpen(String),
    #[error("quote is {0}; only received quotes can be awarded")]
    QuoteNotReceived(String),
    #[error("rfq has no received quotes to award")]
    NoReceivedQuotes,
}

impl From<AwardError> for AppError {
    fn from(value: AwardError) -> Self {
        match value {
            AwardError::RfqNotFound(_) | AwardError::QuoteNotFound(_) => AppError::not_found(),
            AwardError::RfqNotOpen(_) | AwardError::QuoteNotReceived(_) => {
                AppError::conflict(value.to_string())
            }
            AwardError::NoReceivedQuotes => AppError::bad_request(value.to_string()),
            AwardError::Database(err) => AppError::from(err),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AwardOutcome {
    pub rfq_id: Uuid,
    pub awarded_quote_id: Uuid,
    pub rejected_quote_ids: Vec<Uuid>,
    pub notifications_queued: usize,
    pub notification_failures: usize,
}

/// Recomputes ranks for every quote of an RFQ. Only `received` quotes are ranked; the rest are cleared.
pub fn rerank_rfq(
    conn: &mut PgConnection,
    rfq_id: Uuid,
) -> Result<Vec<QuoteRanking>, diesel::result::Error> {
    conn.transaction(|conn| {
        let received: Vec<VendorQuote> = vendor_quotes::table
            .filter(vendor_quotes::rfq_id.eq(rfq_id))
            .filter(vendor_quotes::status.eq(QuoteStatus::Received.as_str()))
            .load(conn)?;

        // Cleared first so the (rfq_id, overall_rank) unique index never sees a transient duplicate.
        diesel::update(vendor_quotes::table.filter(vendor_quotes::rfq_id.eq(rfq_id)))
            .set((
                vendor_quotes::price_rank.eq(None::<i32>),
                vendor_quotes::lead_time_rank.eq(None::<i32>),
                vendor_quotes::overall_score.eq(None::<f64>),
                vendor_quotes::overall_rank.eq(None::<i32>),
            ))
            .execute(conn)?;

        let inputs: Vec<RankInput> = received.iter().map(RankInput::from).collect();
        let rankings = rank_quotes(&inputs);
        for ranking in &rankings {
            diesel::update(vendor_quotes::table.find(ranking.quote_id))
                .set((
                    vendor_quotes::price_rank.eq(Some(ranking.price_rank)),
                    vendor_quotes::lead_time_rank.eq(Some(ranking.lead_time_rank)),
                    vendor_quotes::overall_score.eq(Some(ranking.overall_score)),
                    vendor_quotes::overall_rank.eq(Some(ranking.overall_rank)),
                ))
                .execute(conn)?;
        }
        Ok(rankings)
    })
}

/// Awards `quote_id` (or the current recommendation) and queues one notification per affected vendor.
pub fn award_quote(
    conn: &mut PgConnection,
    rfq_id: Uuid,
    quote_id: Option<Uuid>,
) -> Result<AwardOutcome, AwardError> {
    let (rfq, winner, rejected) = conn.transaction::<_, AwardError, _>(|conn| {
        let rfq: Rfq = rfqs::table
            .find(rfq_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(AwardError::RfqNotFound(rfq_id))?;

        if rfq.status != RfqStatus::Open.as_str() {
            return Err(AwardError::RfqNotOpen(rfq.status));
        }

        let rankings = rerank_rfq(conn, rfq_id)?;
        let chosen_id = match quote_id {
            Some(id) => id,
            None => rankings
                .first()
                .map(|ranking| ranking.quote_id)
                .ok_or(AwardError::NoReceivedQuotes)?,
        };

        let chosen: VendorQuote = vendor_quotes::table
            .filter(vendor_quotes::id.eq(chosen_id))
            .filter(vendor_quotes::rfq_id.eq(rfq_id))
            .first(conn)
            .optional()?
            .ok_or(AwardError::QuoteNotFound(chosen_id))?;

        if chosen.status != QuoteStatus::Received.as_str() {
            return Err(AwardError::QuoteNotReceived(chosen.status));
        }

        let now = Utc::now().naive_utc();
        let winner: VendorQuote = diesel::update(vendor_quotes::table.find(chosen.id))
            .set((
                vendor_quotes::status.eq(QuoteStatus::Accepted.as_str()),
                vendor_quotes::updated_at.eq(now),
            ))
            .get_result(conn)?;

        let rejected: Vec<VendorQuote> = diesel::update(
            vendor_quotes::table
                .filter(vendor_quotes::rfq_id.eq(rfq_id))
                .filter(vendor_quotes::id.ne(chosen.id))
                .filter(vendor_quotes::status.eq(QuoteStatus::Received.as_str())),
        )
        .set((
            vendor_quotes::status.eq(QuoteStatus::Rejected.as_str()),
            vendor_quotes::updated_at.eq(now),
        ))
        .get_results(conn)?;

        let rfq: Rfq = diesel::update(rfqs::table.find(rfq_id))
            .set((
                rfqs::status.eq(RfqStatus::Awarded.as_str()),
                rfqs::awarded_quote_id.eq(Some(winner.id)),
                rfqs::updated_at.eq(now),
            ))
            .get_result(conn)?;

        rerank_rfq(conn, rfq_id)?;
        Ok((rfq, winner, rejected))
    })?;

    info!(
        rfq_id = %rfq.id,
        quote_id = %winner.id,
        rejected = rejected.len(),
        "rfq awarded"
    );

    let mut queued = 0;
    let mut failures = 0;
    let affected = std::iter::once((&winner, true)).chain(rejected.iter().map(|quote| (quote, false)));
    for (quote, awarded) in affected {
        match queue_vendor_notice(conn, &rfq, quote, awarded) {
            Ok(()) => queued += 1,
            Err(err) => {
                warn!(quote_id = %quote.id, error = %err, "failed to queue vendor notification");
                failures += 1;
            }
        }
    }

    Ok(AwardOutcome {
        rfq_id: rfq.id,
        awarded_quote_id: winner.id,
        rejected_quote_ids: rejected.iter().map(|quote| quote.id).collect(),
        notifications_queued: queued,
        notification_failures: failures,
    })
}

fn queue_vendor_notice(
    conn: &mut PgConnection,
    rfq: &Rfq,
    quote: &VendorQuote,
    awarded: bool,
) -> anyhow::Result<()> {
    let notice = VendorNotice {
        rfq_id: rfq.id,
        rfq_title: rfq.title.clone(),
        quote_id: quote.id,
        vendor_name: quote.vendor_name.clone(),
        vendor_email: quote.vendor_email.clone(),
        awarded,
        total_price: quote.total_price,
        currency: quote.currency.clone(),
    };
    enqueue_job(conn, JOB_NOTIFY_VENDOR, serde_json::to_value(&notice)?, None)?;
    Ok(())
}
