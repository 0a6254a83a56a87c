//! Staging of raw upload bytes before the warehouse load.

use crate::gcp_auth::{TokenError, TokenSource};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("authentication failed: {0}")]
    Auth(#[from] TokenError),
    #[error("upload of {object} failed: {source}")]
    Transport {
        object: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("upload of {object} rejected with {status}: {body}")]
    Rejected {
        object: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("stored object {object} does not match the upload: {detail}")]
    Mismatch { object: String, detail: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a staged upload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedObject {
    pub object_name: String,
    /// Location handed to the warehouse loader (`gs://...` or `file://...`).
    pub uri: String,
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Writes the whole payload under `object_name` in a single shot.
    async fn put(
        &self,
        object_name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StagedObject, StagingError>;
}

/// Google Cloud Storage bucket, written through the JSON API media upload.
pub struct GcsStagingStore {
    client: reqwest::Client,
    tokens: Arc<TokenSource>,
    /// `https://storage.googleapis.com` or an emulator root.
    api_url: String,
    bucket: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    size: String,
    md5_hash: Option<String>,
}

impl GcsStagingStore {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<TokenSource>,
        api_url: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            api_url: api_url.into(),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl StagingStore for GcsStagingStore {
    async fn put(
        &self,
        object_name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StagedObject, StagingError> {
        let token = self.tokens.access_token().await?;
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.api_url,
            self.bucket,
            urlencoding::encode(object_name)
        );
        let transport = |source| StagingError::Transport {
            object: object_name.to_string(),
            source,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StagingError::Rejected {
                object: object_name.to_string(),
                status,
                body,
            });
        }

        let stored: GcsObject = response.json().await.map_err(transport)?;
        verify_stored(&stored, bytes)?;

        Ok(StagedObject {
            uri: format!("gs://{}/{}", self.bucket, stored.name),
            object_name: stored.name,
        })
    }
}

/// Rejects an object whose size or digest differs from what was sent.
fn verify_stored(stored: &GcsObject, bytes: &[u8]) -> Result<(), StagingError> {
    let mismatch = |detail: String| StagingError::Mismatch {
        object: stored.name.clone(),
        detail,
    };

    if stored.size != bytes.len().to_string() {
        return Err(mismatch(format!(
            "{} bytes stored, {} sent",
            stored.size,
            bytes.len()
        )));
    }
    if let Some(remote) = &stored.md5_hash {
        let local = STANDARD.encode(md5::compute(bytes).0);
        if remote != &local {
            return Err(mismatch(format!("md5 {} stored, {} sent", remote, local)));
        }
    }
    Ok(())
}

/// Directory-backed staging for local development.
pub struct LocalStagingStore {
    root: PathBuf,
}

impl LocalStagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StagingStore for LocalStagingStore {
    async fn put(
        &self,
        object_name: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<StagedObject, StagingError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(object_name);
        tokio::fs::write(&path, bytes).await?;

        let written = tokio::fs::metadata(&path).await?.len();
        if written != bytes.len() as u64 {
            return Err(StagingError::Mismatch {
                object: object_name.to_string(),
                detail: format!("{} bytes stored, {} sent", written, bytes.len()),
            });
        }

        let absolute = std::path::absolute(&path)?;
        Ok(StagedObject {
            object_name: object_name.to_string(),
            uri: format!("file://{}", absolute.display()),
        })
    }
}
