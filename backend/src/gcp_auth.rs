//! OAuth access tokens for the Google Cloud REST APIs.
//!
//! A token configured through `GOOGLE_OAUTH_ACCESS_TOKEN` is used as-is. Otherwise
//! the service account attached to the instance is asked through the metadata
//! server, and the token is cached until shortly before it expires.

use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("metadata server request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("metadata server returned {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct TokenSource {
    client: reqwest::Client,
    metadata_url: String,
    fixed: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    /// `metadata_url` is the metadata server root, normally `http://metadata.google.internal`.
    pub fn new(client: reqwest::Client, metadata_url: impl Into<String>, fixed: Option<String>) -> Self {
        Self {
            client,
            metadata_url: metadata_url.into(),
            fixed,
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<String, TokenError> {
        if let Some(token) = &self.fixed {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .get(format!("{}{}", self.metadata_url, METADATA_TOKEN_PATH))
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TokenError::Status(response.status()));
        }
        let token: MetadataToken = response.json().await?;
        log::debug!("Fetched access token valid for {}s", token.expires_in);

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }
}
