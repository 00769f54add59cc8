use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use rand::RngCore;
use thiserror::Error;
use tokio::task;

use super::OAuthProvider;
use crate::db::PgPool;
use crate::error::AppError;
use crate::models::OAuthStateRow;
use crate::schema::oauth_states;

const STATE_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum OAuthStateError {
    #[error("unknown or already used state")]
    Unknown,
    #[error("state has expired")]
    Expired,
    #[error("state was issued for {issued_for}, not {presented}")]
    ProviderMismatch { issued_for: String, presented: String },
    #[error("state store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl From<OAuthStateError> for AppError {
    fn from(value: OAuthStateError) -> Self {
        match value {
            OAuthStateError::Store(err) => AppError::internal(err),
            rejected => AppError::bad_request(rejected.to_string()),
        }
    }
}

/// Single-use CSRF state tokens shared by every API instance.
#[async_trait]
pub trait OAuthStateStore: Send + Sync + 'static {
    async fn issue(&self, provider: OAuthProvider) -> Result<String, OAuthStateError>;

    /// Removes the state and checks it; a state can never be consumed twice.
    async fn consume(&self, state: &str, provider: OAuthProvider) -> Result<(), OAuthStateError>;

    async fn purge_expired(&self) -> Result<usize, OAuthStateError>;
}

pub fn generate_state_token() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Validates a state row that has just been removed from the store.
pub fn check_consumed(
    row: &OAuthStateRow,
    provider: OAuthProvider,
    now: NaiveDateTime,
) -> Result<(), OAuthStateError> {
    if row.expires_at <= now {
        return Err(OAuthStateError::Expired);
    }
    if row.provider != provider.as_str() {
        return Err(OAuthStateError::ProviderMismatch {
            issued_for: row.provider.clone(),
            presented: provider.to_string(),
        });
    }
    Ok(())
}

pub struct PgOAuthStateStore {
    pool: PgPool,
    ttl: Duration,
}

impl PgOAuthStateStore {
    pub fn new(pool: PgPool, ttl_minutes: i64) -> Self {
        Self {
            pool,
            ttl: Duration::minutes(ttl_minutes),
        }
    }
}

#[async_trait]
impl OAuthStateStore for PgOAuthStateStore {
    async fn issue(&self, provider: OAuthProvider) -> Result<String, OAuthStateError> {
        let pool = self.pool.clone();
        let now = Utc::now().naive_utc();
        let row = OAuthStateRow {
            state: generate_state_token(),
            provider: provider.as_str().to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };

        task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::insert_into(oauth_states::table)
                .values(&row)
                .execute(&mut conn)?;
            Ok::<String, anyhow::Error>(row.state)
        })
        .await
        .map_err(|err| anyhow!("oauth state task failed: {err}"))?
        .map_err(OAuthStateError::from)
    }

    async fn consume(&self, state: &str, provider: OAuthProvider) -> Result<(), OAuthStateError> {
        let pool = self.pool.clone();
        let state = state.to_string();
        let removed = task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let row = diesel::delete(oauth_states::table.find(state))
                .get_result::<OAuthStateRow>(&mut conn)
                .optional()?;
            Ok::<Option<OAuthStateRow>, anyhow::Error>(row)
        })
        .await
        .map_err(|err| anyhow!("oauth state task failed: {err}"))??;

        let row = removed.ok_or(OAuthStateError::Unknown)?;
        check_consumed(&row, provider, Utc::now().naive_utc())
    }

    async fn purge_expired(&self) -> Result<usize, OAuthStateError> {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let purged = diesel::delete(
                oauth_states::table.filter(oauth_states::expires_at.le(Utc::now().naive_utc())),
            )
            .execute(&mut conn)?;
            Ok::<usize, anyhow::Error>(purged)
        })
        .await
        .map_err(|err| anyhow!("oauth state task failed: {err}"))?
        .map_err(OAuthStateError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(provider: &str, expires_in_minutes: i64) -> OAuthStateRow {
        let now = Utc::now().naive_utc();
        OAuthStateRow {
            state: generate_state_token(),
            provider: provider.into(),
            created_at: now,
            expires_at: now + Duration::minutes(expires_in_minutes),
        }
    }

    #[test]
    fn tokens_are_random_hex() {
        let first = generate_state_token();
        let second = generate_state_token();
        assert_eq!(first.len(), STATE_BYTES * 2);
        assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[test]
    fn live_state_for_same_provider_is_accepted() {
        let now = Utc::now().naive_utc();
        assert!(check_consumed(&row("google", 10), OAuthProvider::Google, now).is_ok());
    }

    #[test]
    fn expired_or_mismatched_states_are_rejected() {
        let now = Utc::now().naive_utc();
        assert!(matches!(
            check_consumed(&row("google", -1), OAuthProvider::Google, now),
            Err(OAuthStateError::Expired)
        ));
        assert!(matches!(
            check_consumed(&row("shopify", 10), OAuthProvider::Google, now),
            Err(OAuthStateError::ProviderMismatch { .. })
        ));
    }
}
