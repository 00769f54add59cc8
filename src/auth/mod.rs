pub mod jwt;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::AppState};

pub const ROLE_OPERATOR: &str = "operator";

/// Operator identity taken from a verified bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub operator_id: uuid::Uuid,
    pub name: String,
    pub role: String,
}

#[async_trait]
impl FromRequestParts<AppState> for Operator {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;
        if claims.role != ROLE_OPERATOR {
            return Err(AppError::forbidden("operator role required"));
        }

        Ok(Operator {
            operator_id: claims.sub,
            name: claims.name,
            role: claims.role,
        })
    }
}
