use std::collections::{HashMap, HashSet};
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::NaiveDateTime;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use opsdesk::auth::jwt::JwtService;
use opsdesk::auth::ROLE_OPERATOR;
use opsdesk::config::AppConfig;
use opsdesk::db::{self, PgPool};
use opsdesk::filing::{KeywordClassifier, MailMessage, MailProvider, MessageAttachment};
use opsdesk::models::Job;
use opsdesk::procurement::Notifier;
use opsdesk::routes;
use opsdesk::state::AppState;
use opsdesk::storage::ObjectStorage;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const SHOP_DOMAIN: &str = "acme-store.myshopify.com";
pub const SHOP_SECRET: &str = "shpss_test_secret";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

/// In-memory bucket; writes to keys containing a rejected fragment fail.
#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    rejected_fragment: Mutex<Option<String>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        if let Some(fragment) = self.rejected_fragment.lock().await.as_deref() {
            ensure!(!key.contains(fragment), "bucket refused write to {key}");
        }
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }

    /// Fails every later write whose key contains `fragment` (`""` rejects all).
    #[allow(dead_code)]
    pub async fn reject_keys_containing(&self, fragment: &str) {
        *self.rejected_fragment.lock().await = Some(fragment.to_string());
    }

    #[allow(dead_code)]
    pub async fn accept_all(&self) {
        *self.rejected_fragment.lock().await = None;
    }
}

/// In-memory inbox; attachment bytes are keyed by `(message id, attachment id)`.
#[derive(Default)]
pub struct FakeMailbox {
    messages: Mutex<Vec<MailMessage>>,
    payloads: Mutex<HashMap<(String, String), Vec<u8>>>,
    withheld: Mutex<HashSet<String>>,
}

impl FakeMailbox {
    #[allow(dead_code)]
    pub async fn deliver(
        &self,
        sender_address: &str,
        subject: &str,
        received_at: NaiveDateTime,
        files: &[(&str, &[u8])],
    ) -> String {
        let provider_message_id = format!("msg-{}", Uuid::new_v4());
        let mut attachments = Vec::new();
        let mut payloads = self.payloads.lock().await;
        for (index, (filename, bytes)) in files.iter().enumerate() {
            let provider_attachment_id = format!("att-{index}");
            payloads.insert(
                (provider_message_id.clone(), provider_attachment_id.clone()),
                bytes.to_vec(),
            );
            attachments.push(MessageAttachment {
                provider_attachment_id,
                filename: filename.to_string(),
                content_type: None,
                size_bytes: bytes.len() as i64,
            });
        }

        self.messages.lock().await.push(MailMessage {
            provider_message_id: provider_message_id.clone(),
            sender_address: sender_address.to_string(),
            sender_name: None,
            subject: subject.to_string(),
            body_preview: String::new(),
            received_at,
            attachments,
        });
        provider_message_id
    }

    /// Attachment downloads for this message fail until released.
    #[allow(dead_code)]
    pub async fn withhold(&self, provider_message_id: &str) {
        self.withheld
            .lock()
            .await
            .insert(provider_message_id.to_string());
    }

    #[allow(dead_code)]
    pub async fn release(&self, provider_message_id: &str) {
        self.withheld.lock().await.remove(provider_message_id);
    }
}

#[async_trait]
impl MailProvider for FakeMailbox {
    async fn list_messages_with_attachments(&self, max_results: usize) -> Result<Vec<MailMessage>> {
        let guard = self.messages.lock().await;
        let mut messages = guard.clone();
        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        messages.truncate(max_results);
        Ok(messages)
    }

    async fn fetch_attachment(
        &self,
        provider_message_id: &str,
        provider_attachment_id: &str,
    ) -> Result<Vec<u8>> {
        ensure!(
            !self.withheld.lock().await.contains(provider_message_id),
            "mailbox unavailable for {provider_message_id}"
        );
        let guard = self.payloads.lock().await;
        guard
            .get(&(
                provider_message_id.to_string(),
                provider_attachment_id.to_string(),
            ))
            .cloned()
            .ok_or_else(|| anyhow!("attachment {provider_attachment_id} missing"))
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        self.sent.lock().await.push(text.to_string());
        Ok(())
    }
}

impl FakeNotifier {
    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    mailbox: Arc<FakeMailbox>,
    notifier: Arc<FakeNotifier>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            app_base_url: "https://app.test".to_string(),
            oauth_redirect_base_url: Some("https://api.test".to_string()),
            oauth_state_ttl_minutes: 10,
            quickbooks_client_id: Some("qb-test-client".to_string()),
            shopify_client_id: Some("shop-test-client".to_string()),
            google_client_id: None,
            shopify_webhook_secrets: HashMap::from([(
                SHOP_DOMAIN.to_string(),
                SHOP_SECRET.to_string(),
            )]),
            notification_webhook_url: None,
            auto_approve_threshold: 1000.0,
            approval_escalation_hours: 48,
            filing_batch_size: 25,
            filing_accept_unknown_senders: false,
            filing_default_destination: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let mailbox = Arc::new(FakeMailbox::default());
        let notifier = Arc::new(FakeNotifier::default());
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(
            pool.clone(),
            config,
            storage.clone(),
            jwt,
            Arc::new(KeywordClassifier::new()?),
            notifier.clone(),
        )
        .with_mailbox(mailbox.clone());
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
            mailbox,
            notifier,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn mailbox(&self) -> Arc<FakeMailbox> {
        self.mailbox.clone()
    }

    #[allow(dead_code)]
    pub fn notifier(&self) -> Arc<FakeNotifier> {
        self.notifier.clone()
    }

    pub fn operator_token(&self, name: &str) -> Result<String> {
        self.state
            .jwt
            .generate_token(Uuid::new_v4(), name, ROLE_OPERATOR)
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            use opsdesk::schema::jobs::dsl::{job_type as job_type_col, jobs as jobs_table};
            let rows = jobs_table
                .filter(job_type_col.eq(&ty))
                .load::<Job>(conn)
                .context("failed to load jobs")?;
            Ok(rows)
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(Method::POST, path, Body::from(body), Some("application/json"), token, &[])
            .await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(Method::PATCH, path, Body::from(body), Some("application/json"), token, &[])
            .await
    }

    #[allow(dead_code)]
    pub async fn post_raw(
        &self,
        path: &str,
        body: Vec<u8>,
        headers: &[(&str, String)],
    ) -> Result<hyper::Response<Body>> {
        self.send(
            Method::POST,
            path,
            Body::from(body),
            Some("application/json"),
            None,
            headers,
        )
        .await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::GET, path, Body::empty(), None, token, &[])
            .await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::DELETE, path, Body::empty(), None, token, &[])
            .await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Body,
        content_type: Option<&str>,
        token: Option<&str>,
        headers: &[(&str, String)],
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder.body(body)?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_json(response: hyper::Response<Body>) -> Result<serde_json::Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        db::run_migrations(&mut conn)?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE attachment_filings, email_attachments, inbound_emails, filing_rules, \
         sender_rules, vendor_quotes, rfqs, approval_items, journal_lines, journal_entries, \
         oauth_states, webhook_events, jobs RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
