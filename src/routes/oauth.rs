use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::oauth::{
    authorization_url, ensure_configured, normalize_shop_domain, settings_error_redirect,
    OAuthProvider, OAuthStartError,
};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct StartQuery {
    pub shop: Option<String>,
}

#[derive(Deserialize)]
pub struct VerifyStateRequest {
    pub provider: String,
    pub state: String,
}

#[derive(Serialize)]
pub struct VerifyStateResponse {
    pub valid: bool,
    pub provider: OAuthProvider,
}

/// Issues a state token and sends the browser to the provider's consent screen.
pub async fn start_oauth(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<StartQuery>,
) -> AppResult<Redirect> {
    let config = state.config.as_ref();
    let provider: OAuthProvider = match provider.parse() {
        Ok(provider) => provider,
        Err(_) => {
            return Ok(Redirect::to(&settings_error_redirect(
                config,
                &provider,
                "unknown_provider",
            )))
        }
    };

    if let Err(err) = ensure_configured(config, provider) {
        tracing::warn!(%provider, error = %err, "oauth start without credentials");
        return Ok(Redirect::to(&settings_error_redirect(
            config,
            provider.as_str(),
            "missing_credentials",
        )));
    }

    if provider == OAuthProvider::Shopify {
        let shop = query
            .shop
            .as_deref()
            .ok_or_else(|| AppError::bad_request(OAuthStartError::MissingShop.to_string()))?;
        normalize_shop_domain(shop).map_err(|err| AppError::bad_request(err.to_string()))?;
    }

    let token = state.oauth_states.issue(provider).await?;
    let url = authorization_url(config, provider, &token, query.shop.as_deref())
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    tracing::info!(%provider, "oauth flow started");
    Ok(Redirect::to(url.as_str()))
}

/// Consumes a state token returned by a provider callback.
pub async fn verify_oauth_state(
    State(state): State<AppState>,
    Json(payload): Json<VerifyStateRequest>,
) -> AppResult<Json<VerifyStateResponse>> {
    let provider: OAuthProvider = payload
        .provider
        .trim()
        .parse()
        .map_err(AppError::bad_request)?;
    if payload.state.trim().is_empty() {
        return Err(AppError::bad_request("state must not be empty"));
    }

    state.oauth_states.consume(payload.state.trim(), provider).await?;
    Ok(Json(VerifyStateResponse {
        valid: true,
        provider,
    }))
}
