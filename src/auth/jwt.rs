use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

/// Signs and verifies operator bearer tokens (HS256).
#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    lifetime: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub role: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        anyhow::ensure!(!config.jwt_secret.is_empty(), "JWT_SECRET must not be empty");

        let mut validation = Validation::default();
        validation.set_issuer(&[config.jwt_issuer.as_str()]);
        validation.set_audience(&[config.jwt_audience.as_str()]);

        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            lifetime: Duration::minutes(config.jwt_expiry_minutes),
        })
    }

    pub fn generate_token(&self, operator_id: Uuid, name: &str, role: &str) -> Result<String> {
        let issued_at = Utc::now();
        let claims = Claims {
            sub: operator_id,
            name: name.to_owned(),
            role: role.to_owned(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.lifetime).timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Checks signature, issuer, audience and expiry.
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        Ok(decode::<Claims>(token, &self.decoding, &self.validation)?.claims)
    }
}
