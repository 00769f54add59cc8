use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    filing::{DocumentClassifier, KeywordClassifier, MailProvider},
    oauth::{OAuthStateStore, PgOAuthStateStore},
    procurement::{ChatWebhookNotifier, LogNotifier, Notifier},
    storage::{ObjectStorage, S3Storage},
    webhooks::{PgWebhookEventStore, WebhookEventStore},
};

pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub jwt: JwtService,
    pub mailbox: Option<Arc<dyn MailProvider>>,
    pub classifier: Arc<dyn DocumentClassifier>,
    pub notifier: Arc<dyn Notifier>,
    pub webhook_events: Arc<dyn WebhookEventStore>,
    pub oauth_states: Arc<dyn OAuthStateStore>,
}

impl AppState {
    /// Postgres-backed webhook and OAuth stores; no mail provider until one is attached.
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
        classifier: Arc<dyn DocumentClassifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let webhook_events = Arc::new(PgWebhookEventStore::new(pool.clone()));
        let oauth_states = Arc::new(PgOAuthStateStore::new(
            pool.clone(),
            config.oauth_state_ttl_minutes,
        ));
        Self {
            pool,
            config: Arc::new(config),
            storage,
            jwt,
            mailbox: None,
            classifier,
            notifier,
            webhook_events,
            oauth_states,
        }
    }

    /// Production wiring: S3 storage, keyword classifier, and chat notifications when configured.
    pub async fn connect(pool: PgPool, config: AppConfig) -> anyhow::Result<Self> {
        let storage = Arc::new(S3Storage::connect(&config).await?);
        let jwt = JwtService::from_config(&config)?;
        let classifier = Arc::new(KeywordClassifier::new()?);
        let notifier: Arc<dyn Notifier> = match config.notification_webhook_url.as_deref() {
            Some(url) => Arc::new(ChatWebhookNotifier::new(url)),
            None => Arc::new(LogNotifier),
        };
        Ok(Self::new(pool, config, storage, jwt, classifier, notifier))
    }

    pub fn with_mailbox(mut self, mailbox: Arc<dyn MailProvider>) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
