use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{NewRfq, NewVendorQuote, Rfq, VendorQuote};
use crate::procurement::{award_quote, rerank_rfq, AwardOutcome, QuoteRanking, QuoteStatus, RfqStatus};
use crate::schema::{rfqs, vendor_quotes};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateRfqRequest {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateQuoteRequest {
    pub vendor_id: Option<Uuid>,
    pub vendor_name: String,
    pub vendor_email: Option<String>,
    pub unit_price: f64,
    pub total_price: f64,
    pub currency: Option<String>,
    pub lead_time_days: i32,
    pub ai_score: Option<f64>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateQuoteRequest {
    pub status: Option<String>,
    pub unit_price: Option<f64>,
    pub total_price: Option<f64>,
    pub lead_time_days: Option<i32>,
    pub ai_score: Option<f64>,
}

#[derive(Deserialize)]
pub struct AwardRequest {
    pub quote_id: Option<Uuid>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = vendor_quotes)]
struct QuoteChangeset {
    status: Option<String>,
    unit_price: Option<f64>,
    total_price: Option<f64>,
    lead_time_days: Option<i32>,
    ai_score: Option<Option<f64>>,
    updated_at: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct QuoteResponse {
    pub id: Uuid,
    pub rfq_id: Uuid,
    pub vendor_id: Uuid,
    pub vendor_name: String,
    pub vendor_email: Option<String>,
    pub unit_price: f64,
    pub total_price: f64,
    pub currency: String,
    pub lead_time_days: i32,
    pub ai_score: Option<f64>,
    pub status: String,
    pub price_rank: Option<i32>,
    pub lead_time_rank: Option<i32>,
    pub overall_score: Option<f64>,
    pub overall_rank: Option<i32>,
}

impl From<VendorQuote> for QuoteResponse {
    fn from(quote: VendorQuote) -> Self {
        Self {
            id: quote.id,
            rfq_id: quote.rfq_id,
            vendor_id: quote.vendor_id,
            vendor_name: quote.vendor_name,
            vendor_email: quote.vendor_email,
            unit_price: quote.unit_price,
            total_price: quote.total_price,
            currency: quote.currency,
            lead_time_days: quote.lead_time_days,
            ai_score: quote.ai_score,
            status: quote.status,
            price_rank: quote.price_rank,
            lead_time_rank: quote.lead_time_rank,
            overall_score: quote.overall_score,
            overall_rank: quote.overall_rank,
        }
    }
}

#[derive(Serialize)]
pub struct RfqResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub awarded_quote_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub quotes: Vec<QuoteResponse>,
}

impl RfqResponse {
    fn new(rfq: Rfq, quotes: Vec<VendorQuote>) -> Self {
        Self {
            id: rfq.id,
            title: rfq.title,
            description: rfq.description,
            status: rfq.status,
            awarded_quote_id: rfq.awarded_quote_id,
            created_at: rfq.created_at,
            quotes: quotes.into_iter().map(QuoteResponse::from).collect(),
        }
    }
}

fn load_quotes(conn: &mut PgConnection, rfq_id: Uuid) -> QueryResult<Vec<VendorQuote>> {
    vendor_quotes::table
        .filter(vendor_quotes::rfq_id.eq(rfq_id))
        .order((
            vendor_quotes::overall_rank.asc().nulls_last(),
            vendor_quotes::created_at.asc(),
        ))
        .load(conn)
}

pub async fn list_rfqs(State(state): State<AppState>) -> AppResult<Json<Vec<RfqResponse>>> {
    let mut conn = state.db()?;
    let rfq_list: Vec<Rfq> = rfqs::table
        .order(rfqs::created_at.desc())
        .load(&mut conn)?;

    let mut response = Vec::with_capacity(rfq_list.len());
    for rfq in rfq_list {
        let quotes = load_quotes(&mut conn, rfq.id)?;
        response.push(RfqResponse::new(rfq, quotes));
    }
    Ok(Json(response))
}

pub async fn create_rfq(
    State(state): State<AppState>,
    Json(payload): Json<CreateRfqRequest>,
) -> AppResult<(StatusCode, Json<RfqResponse>)> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }

    let mut conn = state.db()?;
    let rfq: Rfq = diesel::insert_into(rfqs::table)
        .values(&NewRfq {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: payload.description,
            status: RfqStatus::Open.as_str().to_string(),
        })
        .get_result(&mut conn)?;

    Ok((StatusCode::CREATED, Json(RfqResponse::new(rfq, Vec::new()))))
}

pub async fn get_rfq(
    State(state): State<AppState>,
    Path(rfq_id): Path<Uuid>,
) -> AppResult<Json<RfqResponse>> {
    let mut conn = state.db()?;
    let rfq: Rfq = rfqs::table.find(rfq_id).first(&mut conn)?;
    let quotes = load_quotes(&mut conn, rfq_id)?;
    Ok(Json(RfqResponse::new(rfq, quotes)))
}

pub async fn add_quote(
    State(state): State<AppState>,
    Path(rfq_id): Path<Uuid>,
    Json(payload): Json<CreateQuoteRequest>,
) -> AppResult<(StatusCode, Json<QuoteResponse>)> {
    let vendor_name = payload.vendor_name.trim();
    if vendor_name.is_empty() {
        return Err(AppError::bad_request("vendor_name must not be empty"));
    }
    check_amounts(Some(payload.unit_price), Some(payload.total_price))?;
    check_lead_time(Some(payload.lead_time_days))?;
    let status = match payload.status.as_deref() {
        Some(raw) => quote_status_for_edit(raw)?,
        None => QuoteStatus::Received,
    };
    let currency = payload
        .currency
        .as_deref()
        .map(str::trim)
        .unwrap_or("USD")
        .to_ascii_uppercase();
    if currency.len() != 3 {
        return Err(AppError::bad_request("currency must be a 3-letter code"));
    }

    let new_quote = NewVendorQuote {
        id: Uuid::new_v4(),
        rfq_id,
        vendor_id: payload.vendor_id.unwrap_or_else(Uuid::new_v4),
        vendor_name: vendor_name.to_string(),
        vendor_email: payload.vendor_email,
        unit_price: payload.unit_price,
        total_price: payload.total_price,
        currency,
        lead_time_days: payload.lead_time_days,
        ai_score: payload.ai_score,
        status: status.as_str().to_string(),
    };

    let mut conn = state.db()?;
    let quote = conn.transaction::<VendorQuote, AppError, _>(|conn| {
        let rfq: Rfq = rfqs::table.find(rfq_id).for_update().first(conn)?;
        ensure_open(&rfq)?;
        diesel::insert_into(vendor_quotes::table)
            .values(&new_quote)
            .execute(conn)?;
        rerank_rfq(conn, rfq_id)?;
        Ok(vendor_quotes::table.find(new_quote.id).first(conn)?)
    })?;

    Ok((StatusCode::CREATED, Json(quote.into())))
}

pub async fn update_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
    Json(payload): Json<UpdateQuoteRequest>,
) -> AppResult<Json<QuoteResponse>> {
    check_amounts(payload.unit_price, payload.total_price)?;
    check_lead_time(payload.lead_time_days)?;
    let status = payload
        .status
        .as_deref()
        .map(quote_status_for_edit)
        .transpose()?;

    let changeset = QuoteChangeset {
        status: status.map(|status| status.as_str().to_string()),
        unit_price: payload.unit_price,
        total_price: payload.total_price,
        lead_time_days: payload.lead_time_days,
        ai_score: payload.ai_score.map(Some),
        updated_at: Some(Utc::now().naive_utc()),
    };

    let mut conn = state.db()?;
    let quote = conn.transaction::<VendorQuote, AppError, _>(|conn| {
        let existing: VendorQuote = vendor_quotes::table.find(quote_id).first(conn)?;
        let rfq: Rfq = rfqs::table.find(existing.rfq_id).for_update().first(conn)?;
        ensure_open(&rfq)?;

        diesel::update(vendor_quotes::table.find(quote_id))
            .set(&changeset)
            .execute(conn)?;
        rerank_rfq(conn, rfq.id)?;
        Ok(vendor_quotes::table.find(quote_id).first(conn)?)
    })?;

    Ok(Json(quote.into()))
}

pub async fn rank_rfq(
    State(state): State<AppState>,
    Path(rfq_id): Path<Uuid>,
) -> AppResult<Json<Vec<QuoteRanking>>> {
    let mut conn = state.db()?;
    let rankings = conn.transaction::<Vec<QuoteRanking>, AppError, _>(|conn| {
        let _rfq: Rfq = rfqs::table.find(rfq_id).for_update().first(conn)?;
        Ok(rerank_rfq(conn, rfq_id)?)
    })?;
    Ok(Json(rankings))
}

pub async fn award_rfq(
    State(state): State<AppState>,
    Path(rfq_id): Path<Uuid>,
    payload: Option<Json<AwardRequest>>,
) -> AppResult<Json<AwardOutcome>> {
    let quote_id = payload.and_then(|Json(body)| body.quote_id);
    let mut conn = state.db()?;
    let outcome = award_quote(&mut conn, rfq_id, quote_id)?;
    Ok(Json(outcome))
}

fn ensure_open(rfq: &Rfq) -> AppResult<()> {
    if rfq.status != RfqStatus::Open.as_str() {
        return Err(AppError::conflict(format!(
            "rfq is {}; quotes can only change while it is open",
            rfq.status
        )));
    }
    Ok(())
}

/// Operators may move quotes between `pending` and `received`; accept/reject happen through award.
fn quote_status_for_edit(raw: &str) -> AppResult<QuoteStatus> {
    let status: QuoteStatus = raw.trim().parse().map_err(AppError::bad_request)?;
    match status {
        QuoteStatus::Pending | QuoteStatus::Received => Ok(status),
        other => Err(AppError::bad_request(format!(
            "quotes cannot be set to {other} directly; award the rfq instead"
        ))),
    }
}

fn check_amounts(unit_price: Option<f64>, total_price: Option<f64>) -> AppResult<()> {
    for (field, value) in [("unit_price", unit_price), ("total_price", total_price)] {
        if let Some(value) = value {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::bad_request(format!(
                    "{field} must be a non-negative number"
                )));
            }
        }
    }
    Ok(())
}

fn check_lead_time(lead_time_days: Option<i32>) -> AppResult<()> {
    if lead_time_days.is_some_and(|days| days < 0) {
        return Err(AppError::bad_request("lead_time_days must not be negative"));
    }
    Ok(())
}
