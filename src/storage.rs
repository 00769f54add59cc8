use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use crate::config::AppConfig;
use crate::filing::DestinationType;

/// Destination store for filed documents.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()>;

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String>;
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Client for the filing bucket; static credentials and a custom endpoint (MinIO) are optional.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let region_provider =
            RegionProviderChain::first_try(Some(Region::new(config.aws_region.clone())))
                .or_default_provider()
                .or_else("us-east-1");

        #[allow(deprecated)]
        let mut loader = aws_config::from_env().region(region_provider);
        if let Some(endpoint) = &config.aws_endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (
            config.aws_access_key_id.clone(),
            config.aws_secret_access_key.clone(),
        ) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "opsdesk-static",
            ));
        }

        let shared = loader.load().await;
        let s3_config = S3ConfigBuilder::from(&shared).force_path_style(true).build();
        Ok(Self::new(
            S3Client::from_conf(s3_config),
            config.s3_bucket.clone(),
        ))
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        if let Some(content_disposition) = content_disposition {
            request = request.content_disposition(content_disposition);
        }

        request
            .send()
            .await
            .with_context(|| format!("failed to write {key} to the filing bucket"))?;

        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .context("failed to build S3 presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .context("failed to generate presigned download URL")?;

        Ok(presigned.uri().to_string())
    }
}

/// Object key of a filed attachment: `{destination_type}/{destination_path}/{filename}`.
pub fn filed_object_key(destination: DestinationType, path: &str, filename: &str) -> String {
    let filename = sanitize_filename(filename);
    let path = path.trim_matches('/');
    if path.is_empty() {
        format!("{}/{}", destination.as_str(), filename)
    } else {
        format!("{}/{}/{}", destination.as_str(), path, filename)
    }
}

fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn attachment_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}
