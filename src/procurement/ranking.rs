use std::cmp::Ordering;

use serde::Serialize;
use uuid::Uuid;

use crate::models::VendorQuote;

const PRICE_RANK_WEIGHT: f64 = 10.0;
const LEAD_TIME_RANK_WEIGHT: f64 = 5.0;

/// The fields of a received quote that ranking looks at.
#[derive(Debug, Clone, Copy)]
pub struct RankInput {
    pub quote_id: Uuid,
    pub total_price: f64,
    pub lead_time_days: i32,
    pub ai_score: Option<f64>,
}

impl From<&VendorQuote> for RankInput {
    fn from(quote: &VendorQuote) -> Self {
        Self {
            quote_id: quote.id,
            total_price: quote.total_price,
            lead_time_days: quote.lead_time_days,
            ai_score: quote.ai_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteRanking {
    pub quote_id: Uuid,
    pub price_rank: i32,
    pub lead_time_rank: i32,
    pub overall_score: f64,
    pub overall_rank: i32,
}

/// Ranks quotes of one RFQ. The result is ordered by `overall_rank`; rank 1 is the recommendation.
pub fn rank_quotes(inputs: &[RankInput]) -> Vec<QuoteRanking> {
    let price_ranks = ranks_by(inputs, |a, b| a.total_price.total_cmp(&b.total_price));
    let lead_time_ranks = ranks_by(inputs, |a, b| a.lead_time_days.cmp(&b.lead_time_days));

    let mut scored: Vec<(usize, f64)> = inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let score = input.ai_score.unwrap_or(0.0)
                - f64::from(price_ranks[index]) * PRICE_RANK_WEIGHT
                - f64::from(lead_time_ranks[index]) * LEAD_TIME_RANK_WEIGHT;
            (index, score)
        })
        .collect();

    scored.sort_by(|(a_index, a_score), (b_index, b_score)| {
        let a = &inputs[*a_index];
        let b = &inputs[*b_index];
        b_score
            .total_cmp(a_score)
            .then_with(|| a.total_price.total_cmp(&b.total_price))
            .then_with(|| a.quote_id.cmp(&b.quote_id))
    });

    scored
        .into_iter()
        .enumerate()
        .map(|(position, (index, score))| QuoteRanking {
            quote_id: inputs[index].quote_id,
            price_rank: price_ranks[index],
            lead_time_rank: lead_time_ranks[index],
            overall_score: score,
            overall_rank: position as i32 + 1,
        })
        .collect()
}

/// 1-based rank of each input under `compare`, ties broken by lower quote id.
fn ranks_by<F>(inputs: &[RankInput], compare: F) -> Vec<i32>
where
    F: Fn(&RankInput, &RankInput) -> Ordering,
{
    let mut order: Vec<usize> = (0..inputs.len()).collect();
    order.sort_by(|a, b| {
        compare(&inputs[*a], &inputs[*b]).then_with(|| inputs[*a].quote_id.cmp(&inputs[*b].quote_id))
    });

    let mut ranks = vec![0; inputs.len()];
    for (position, index) in order.into_iter().enumerate() {
        ranks[index] = position as i32 + 1;
    }
    ranks
}
