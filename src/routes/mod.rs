use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::Operator, state::AppState};

pub mod approvals;
pub mod filing_rules;
pub mod filings;
pub mod health;
pub mod ledger;
pub mod oauth;
pub mod procurement;
pub mod senders;
pub mod webhooks;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = %value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let sender_routes = Router::new()
        .route(
            "/",
            get(senders::list_sender_rules).post(senders::create_sender_rule),
        )
        .route("/classify", post(senders::classify_sender))
        .route("/:id", delete(senders::delete_sender_rule));

    let filing_rule_routes = Router::new()
        .route(
            "/",
            get(filing_rules::list_filing_rules).post(filing_rules::create_filing_rule),
        )
        .route(
            "/:id",
            axum::routing::patch(filing_rules::update_filing_rule)
                .delete(filing_rules::delete_filing_rule),
        );

    let filing_routes = Router::new()
        .route("/", get(filings::list_filings))
        .route("/scan", post(filings::scan_mailbox))
        .route("/process", post(filings::process_pending_emails))
        .route("/:id", get(filings::get_filing))
        .route("/:id/download", get(filings::download_filing));

    let email_routes = Router::new()
        .route("/", get(filings::list_emails))
        .route("/:id/file", post(filings::file_email));

    let rfq_routes = Router::new()
        .route("/", get(procurement::list_rfqs).post(procurement::create_rfq))
        .route("/:id", get(procurement::get_rfq))
        .route("/:id/quotes", post(procurement::add_quote))
        .route("/:id/rank", post(procurement::rank_rfq))
        .route("/:id/award", post(procurement::award_rfq));

    let approval_routes = Router::new()
        .route(
            "/",
            get(approvals::list_approvals).post(approvals::create_approval),
        )
        .route("/bulk-approve", post(approvals::bulk_approve))
        .route("/escalate", post(approvals::escalate_approvals))
        .route("/:id/approve", post(approvals::approve_item))
        .route("/:id/reject", post(approvals::reject_item));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/senders", sender_routes)
        .nest("/api/filing-rules", filing_rule_routes)
        .nest("/api/filings", filing_routes)
        .nest("/api/emails", email_routes)
        .nest("/api/rfqs", rfq_routes)
        .route(
            "/api/quotes/:id",
            axum::routing::patch(procurement::update_quote),
        )
        .nest("/api/approvals", approval_routes)
        .route("/api/journal-entries", post(ledger::create_journal_entry))
        .route("/api/journal-entries/:id", get(ledger::get_journal_entry))
        .route("/api/oauth/verify", post(oauth::verify_oauth_state))
        .layer(middleware::from_extractor_with_state::<Operator, _>(
            protected_state,
        ));

    Router::new()
        .merge(protected_routes)
        .route("/api/health", get(health::health_check))
        .route("/api/webhooks/shopify", post(webhooks::shopify_webhook))
        .route("/api/oauth/:provider/start", get(oauth::start_oauth))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
