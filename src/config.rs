use std::collections::HashMap;
use std::env;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;
use crate::filing::DestinationType;

#[derive(Clone, Debug, PartialEq)]
pub struct DefaultDestination {
    pub destination_type: DestinationType,
    pub path_template: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub cors_allowed_origin: Option<String>,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub s3_bucket: String,
    pub app_base_url: String,
    pub oauth_redirect_base_url: Option<String>,
    pub oauth_state_ttl_minutes: i64,
    pub quickbooks_client_id: Option<String>,
    pub shopify_client_id: Option<String>,
    pub google_client_id: Option<String>,
    pub shopify_webhook_secrets: HashMap<String, String>,
    pub notification_webhook_url: Option<String>,
    pub auto_approve_threshold: f64,
    pub approval_escalation_hours: i64,
    pub filing_batch_size: i64,
    pub filing_accept_unknown_senders: bool,
    pub filing_default_destination: Option<DefaultDestination>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "opsdesk".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "opsdesk-operators".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let aws_endpoint_url = env::var("AWS_ENDPOINT_URL").ok();
        let aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();
        let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let s3_bucket = env::var("S3_BUCKET").context("S3_BUCKET must be set")?;
        let app_base_url =
            env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());
        let oauth_redirect_base_url = env::var("OAUTH_REDIRECT_BASE_URL").ok();
        let oauth_state_ttl_minutes = env::var("OAUTH_STATE_TTL_MINUTES")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("OAUTH_STATE_TTL_MINUTES must be an integer")?;
        let quickbooks_client_id = non_empty_var("QUICKBOOKS_CLIENT_ID");
        let shopify_client_id = non_empty_var("SHOPIFY_CLIENT_ID");
        let google_client_id = non_empty_var("GOOGLE_CLIENT_ID");
        let shopify_webhook_secrets = env::var("SHOPIFY_WEBHOOK_SECRETS")
            .ok()
            .map(|raw| parse_secret_map(&raw))
            .transpose()
            .context("SHOPIFY_WEBHOOK_SECRETS must be a comma separated list of shop=secret")?
            .unwrap_or_default();
        let notification_webhook_url = non_empty_var("NOTIFICATION_WEBHOOK_URL");
        let auto_approve_threshold = env::var("AUTO_APPROVE_THRESHOLD")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .context("AUTO_APPROVE_THRESHOLD must be a number")?;
        let approval_escalation_hours = env::var("APPROVAL_ESCALATION_HOURS")
            .unwrap_or_else(|_| "48".to_string())
            .parse()
            .context("APPROVAL_ESCALATION_HOURS must be an integer")?;
        let filing_batch_size = env::var("FILING_BATCH_SIZE")
            .unwrap_or_else(|_| "25".to_string())
            .parse::<i64>()
            .context("FILING_BATCH_SIZE must be an integer")?
            .max(1);
        let filing_accept_unknown_senders = env::var("FILING_ACCEPT_UNKNOWN_SENDERS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let filing_default_destination = non_empty_var("FILING_DEFAULT_DESTINATION")
            .map(|raw| parse_default_destination(&raw))
            .transpose()
            .context("FILING_DEFAULT_DESTINATION must look like destination_type:path/template")?;

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            cors_allowed_origin,
            aws_endpoint_url,
            aws_access_key_id,
            aws_secret_access_key,
            aws_region,
            s3_bucket,
            app_base_url,
            oauth_redirect_base_url,
            oauth_state_ttl_minutes,
            quickbooks_client_id,
            shopify_client_id,
            google_client_id,
            shopify_webhook_secrets,
            notification_webhook_url,
            auto_approve_threshold,
            approval_escalation_hours,
            filing_batch_size,
            filing_accept_unknown_senders,
            filing_default_destination,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_secret_map(raw: &str) -> Result<HashMap<String, String>> {
    let mut secrets = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (shop, secret) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("entry `{entry}` is missing '='"))?;
        let shop = shop.trim().to_ascii_lowercase();
        let secret = secret.trim();
        if shop.is_empty() || secret.is_empty() {
            return Err(anyhow!("entry `{entry}` has an empty shop or secret"));
        }
        secrets.insert(shop, secret.to_string());
    }
    Ok(secrets)
}

fn parse_default_destination(raw: &str) -> Result<DefaultDestination> {
    let (kind, template) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("missing ':' separator"))?;
    let destination_type: DestinationType = kind.trim().parse().map_err(|err| anyhow!("{err}"))?;
    if destination_type == DestinationType::Pending {
        return Err(anyhow!("default destination cannot be `pending`"));
    }
    let path_template = template.trim().to_string();
    if path_template.is_empty() {
        return Err(anyhow!("path template must not be empty"));
    }
    Ok(DefaultDestination {
        destination_type,
        path_template,
    })
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
