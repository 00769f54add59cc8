//! Inbound webhook intake.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use diesel::prelude::*;
use tokio::task;

use crate::db::PgPool;
use crate::models::NewWebhookEvent;
use crate::schema::webhook_events;

pub mod shopify;

pub use shopify::{ShopifyDelivery, WebhookOutcome, WebhookRejection};

/// Persistence for accepted webhook deliveries.
#[async_trait]
pub trait WebhookEventStore: Send + Sync + 'static {
    /// Records the event; `false` when its idempotency key was already present.
    async fn record(&self, event: NewWebhookEvent) -> Result<bool>;
}

pub struct PgWebhookEventStore {
    pool: PgPool,
}

impl PgWebhookEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventStore for PgWebhookEventStore {
    async fn record(&self, event: NewWebhookEvent) -> Result<bool> {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let inserted = diesel::insert_into(webhook_events::table)
                .values(&event)
                .on_conflict(webhook_events::idempotency_key)
                .do_nothing()
                .execute(&mut conn)?;
            Ok::<bool, anyhow::Error>(inserted == 1)
        })
        .await
        .map_err(|err| anyhow!("webhook store task failed: {err}"))?
    }
}
