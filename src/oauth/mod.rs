//! OAuth connection start and CSRF state tracking. Token exchange happens elsewhere.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::AppConfig;

pub mod state;

pub use state::{OAuthStateError, OAuthStateStore, PgOAuthStateStore};

const QUICKBOOKS_AUTHORIZE_URL: &str = "https://appcenter.intuit.com/connect/oauth2";
const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const QUICKBOOKS_SCOPES: &str = "com.intuit.quickbooks.accounting";
const SHOPIFY_SCOPES: &str = "read_orders,read_products,read_customers";
const GOOGLE_SCOPES: &str =
    "https://www.googleapis.com/auth/gmail.readonly https://www.googleapis.com/auth/drive.file";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    QuickBooks,
    Shopify,
    Google,
}

impl OAuthProvider {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::QuickBooks => "quickbooks",
            Self::Shopify => "shopify",
            Self::Google => "google",
        }
    }

    fn client_id<'a>(&self, config: &'a AppConfig) -> Option<&'a str> {
        match self {
            Self::QuickBooks => config.quickbooks_client_id.as_deref(),
            Self::Shopify => config.shopify_client_id.as_deref(),
            Self::Google => config.google_client_id.as_deref(),
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quickbooks" => Ok(Self::QuickBooks),
            "shopify" => Ok(Self::Shopify),
            "google" => Ok(Self::Google),
            other => Err(format!("unknown oauth provider `{other}`")),
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum OAuthStartError {
    #[error("{0} client credentials or redirect base are not configured")]
    MissingCredentials(OAuthProvider),
    #[error("a shop domain is required for shopify")]
    MissingShop,
    #[error("invalid shop domain `{0}`")]
    InvalidShop(String),
    #[error("invalid authorization url: {0}")]
    Url(#[from] url::ParseError),
}

/// Checks that the provider can be started at all, before a state token is issued.
pub fn ensure_configured(config: &AppConfig, provider: OAuthProvider) -> Result<(), OAuthStartError> {
    let configured = provider.client_id(config).is_some()
        && config
            .oauth_redirect_base_url
            .as_deref()
            .is_some_and(|base| !base.trim().is_empty());
    if configured {
        Ok(())
    } else {
        Err(OAuthStartError::MissingCredentials(provider))
    }
}

/// Accepts `{name}.myshopify.com` only.
pub fn normalize_shop_domain(raw: &str) -> Result<String, OAuthStartError> {
    let shop = raw.trim().to_ascii_lowercase();
    let valid = shop
        .strip_suffix(".myshopify.com")
        .is_some_and(|name| {
            !name.is_empty()
                && !name.starts_with('-')
                && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        });
    if valid {
        Ok(shop)
    } else {
        Err(OAuthStartError::InvalidShop(raw.to_string()))
    }
}

pub fn callback_url(config: &AppConfig, provider: OAuthProvider) -> Result<String, OAuthStartError> {
    let base = config
        .oauth_redirect_base_url
        .as_deref()
        .ok_or(OAuthStartError::MissingCredentials(provider))?;
    Ok(format!(
        "{}/api/oauth/{}/callback",
        base.trim_end_matches('/'),
        provider
    ))
}

/// Provider authorization URL carrying `state`.
pub fn authorization_url(
    config: &AppConfig,
    provider: OAuthProvider,
    state: &str,
    shop: Option<&str>,
) -> Result<Url, OAuthStartError> {
    ensure_configured(config, provider)?;
    let client_id = provider
        .client_id(config)
        .ok_or(OAuthStartError::MissingCredentials(provider))?;
    let redirect_uri = callback_url(config, provider)?;

    let url = match provider {
        OAuthProvider::QuickBooks => Url::parse_with_params(
            QUICKBOOKS_AUTHORIZE_URL,
            &[
                ("client_id", client_id),
                ("response_type", "code"),
                ("scope", QUICKBOOKS_SCOPES),
                ("redirect_uri", redirect_uri.as_str()),
                ("state", state),
            ],
        )?,
        OAuthProvider::Shopify => {
            let shop = normalize_shop_domain(shop.ok_or(OAuthStartError::MissingShop)?)?;
            Url::parse_with_params(
                &format!("https://{shop}/admin/oauth/authorize"),
                &[
                    ("client_id", client_id),
                    ("scope", SHOPIFY_SCOPES),
                    ("redirect_uri", redirect_uri.as_str()),
                    ("state", state),
                ],
            )?
        }
        OAuthProvider::Google => Url::parse_with_params(
            GOOGLE_AUTHORIZE_URL,
            &[
                ("client_id", client_id),
                ("response_type", "code"),
                ("scope", GOOGLE_SCOPES),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("redirect_uri", redirect_uri.as_str()),
                ("state", state),
            ],
        )?,
    };
    Ok(url)
}

/// Where the browser is sent when a provider cannot be started.
pub fn settings_error_redirect(config: &AppConfig, provider: &str, error: &str) -> String {
    let base = config.app_base_url.trim_end_matches('/');
    match Url::parse_with_params(
        &format!("{base}/settings/integrations"),
        &[("error", error), ("provider", provider)],
    ) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{base}/settings/integrations?error={error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/opsdesk".into(),
            database_max_pool_size: 4,
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            jwt_secret: "secret".into(),
            jwt_issuer: "opsdesk".into(),
            jwt_audience: "opsdesk-operators".into(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".into(),
            s3_bucket: "filings".into(),
            app_base_url: "https://app.example.com/".into(),
            oauth_redirect_base_url: Some("https://api.example.com".into()),
            oauth_state_ttl_minutes: 10,
            quickbooks_client_id: Some("qb-client".into()),
            shopify_client_id: Some("shop-client".into()),
            google_client_id: None,
            shopify_webhook_secrets: HashMap::new(),
            notification_webhook_url: None,
            auto_approve_threshold: 1000.0,
            approval_escalation_hours: 48,
            filing_batch_size: 25,
            filing_accept_unknown_senders: false,
            filing_default_destination: None,
        }
    }

    #[test]
    fn quickbooks_url_carries_state_and_callback() {
        let url = authorization_url(&config(), OAuthProvider::QuickBooks, "abc123", None).unwrap();
        assert_eq!(url.host_str(), Some("appcenter.intuit.com"));
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["state"], "abc123");
        assert_eq!(params["client_id"], "qb-client");
        assert_eq!(
            params["redirect_uri"],
            "https://api.example.com/api/oauth/quickbooks/callback"
        );
    }

    #[test]
    fn shopify_requires_a_valid_shop() {
        let config = config();
        assert!(matches!(
            authorization_url(&config, OAuthProvider::Shopify, "s", None),
            Err(OAuthStartError::MissingShop)
        ));
        assert!(matches!(
            authorization_url(&config, OAuthProvider::Shopify, "s", Some("evil.com/x")),
            Err(OAuthStartError::InvalidShop(_))
        ));
        let url =
            authorization_url(&config, OAuthProvider::Shopify, "s", Some("Acme.myshopify.com"))
                .unwrap();
        assert_eq!(url.host_str(), Some("acme.myshopify.com"));
        assert_eq!(url.path(), "/admin/oauth/authorize");
    }

    #[test]
    fn missing_credentials_are_reported() {
        let err = ensure_configured(&config(), OAuthProvider::Google).unwrap_err();
        assert!(matches!(err, OAuthStartError::MissingCredentials(OAuthProvider::Google)));

        let mut without_redirect = config();
        without_redirect.oauth_redirect_base_url = None;
        assert!(ensure_configured(&without_redirect, OAuthProvider::QuickBooks).is_err());
    }

    #[test]
    fn settings_redirect_names_provider() {
        assert_eq!(
            settings_error_redirect(&config(), "google", "missing_credentials"),
            "https://app.example.com/settings/integrations?error=missing_credentials&provider=google"
        );
    }
}
