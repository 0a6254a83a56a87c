//! Publishing generated view definitions to the LookML repository.
//!
//! Documents are committed through the GitHub contents API, then the Looker
//! project's deploy webhook pulls them into production. A failure after the
//! commit carries the committed blob so the caller can take it back out.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const REFINEMENTS_DIR: &str = "refinements";
const COMMITTER_NAME: &str = "lookml-ingest";
const COMMITTER_EMAIL: &str = "lookml-ingest@users.noreply.github.com";
const USER_AGENT: &str = concat!("lookml-ingest/", env!("CARGO_PKG_VERSION"));

/// A document that is on the branch, identified by its blob sha.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedDefinition {
    pub path: String,
    pub sha: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("{step} failed: {source}")]
    Transport {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{step} rejected with {status}: {body}")]
    Rejected {
        step: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("{} was committed but not deployed: {source}", .committed.path)]
    NotDeployed {
        committed: CommittedDefinition,
        #[source]
        source: Box<PublishError>,
    },
}

impl PublishError {
    /// The definition left on the branch when publishing stopped after the commit.
    pub fn committed(&self) -> Option<&CommittedDefinition> {
        match self {
            PublishError::NotDeployed { committed, .. } => Some(committed),
            _ => None,
        }
    }
}

/// Repository path of the view document for `table_id`.
pub fn definition_path(table_id: &str) -> String {
    format!("{}/{}.view.lkml", REFINEMENTS_DIR, table_id)
}

#[async_trait]
pub trait DefinitionPublisher: Send + Sync {
    /// Commits `document` for `table_id` and deploys it; returns the repository path.
    async fn publish(&self, table_id: &str, document: &str) -> Result<String, PublishError>;

    /// Deletes a definition that was committed by a publish that did not finish.
    async fn retract(&self, definition: &CommittedDefinition) -> Result<(), PublishError>;
}

#[derive(Debug, Clone)]
pub struct GitHubSettings {
    /// `https://api.github.com`, or the API root of a GitHub Enterprise host.
    pub api_url: String,
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub deploy_webhook_url: String,
    pub deploy_secret: String,
    pub settle: Duration,
}

pub struct GitHubPublisher {
    client: reqwest::Client,
    settings: GitHubSettings,
}

#[derive(Deserialize)]
struct ContentsWrite {
    content: ContentsEntry,
}

#[derive(Deserialize)]
struct ContentsEntry {
    sha: String,
}

impl GitHubPublisher {
    pub fn new(client: reqwest::Client, settings: GitHubSettings) -> Self {
        Self { client, settings }
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.settings.api_url, self.settings.owner, self.settings.repo, path
        )
    }

    fn github(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.contents_url(path))
            .bearer_auth(&self.settings.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
    }

    async fn refinements_dir_exists(&self) -> Result<bool, PublishError> {
        const STEP: &str = "checking the refinements directory";
        let response = self
            .github(reqwest::Method::GET, REFINEMENTS_DIR)
            .query(&[("ref", self.settings.branch.as_str())])
            .send()
            .await
            .map_err(|source| PublishError::Transport { step: STEP, source })?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(STEP, response).await.map(|_| true)
    }

    /// Creates or replaces `path`; returns the sha of the new blob.
    async fn write_file(
        &self,
        step: &'static str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, PublishError> {
        let body = commit_body(&self.settings.branch, content, message);
        let response = self
            .github(reqwest::Method::PUT, path)
            .json(&body)
            .send()
            .await
            .map_err(|source| PublishError::Transport { step, source })?;
        let written: ContentsWrite = ensure_success(step, response)
            .await?
            .json()
            .await
            .map_err(|source| PublishError::Transport { step, source })?;
        Ok(written.content.sha)
    }

    async fn trigger_deploy(&self) -> Result<(), PublishError> {
        const STEP: &str = "deploy webhook";
        let response = self
            .client
            .post(&self.settings.deploy_webhook_url)
            .header("X-Looker-Deploy-Secret", &self.settings.deploy_secret)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|source| PublishError::Transport { step: STEP, source })?;
        ensure_success(STEP, response).await.map(|_| ())
    }
}

fn commit_body(branch: &str, content: &str, message: &str) -> serde_json::Value {
    json!({
        "message": message,
        "content": STANDARD.encode(content),
        "branch": branch,
        "committer": {
            "name": COMMITTER_NAME,
            "email": COMMITTER_EMAIL,
        },
    })
}

async fn ensure_success(
    step: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, PublishError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(PublishError::Rejected {
        step,
        status,
        body: response.text().await.unwrap_or_default(),
    })
}

#[async_trait]
impl DefinitionPublisher for GitHubPublisher {
    async fn publish(&self, table_id: &str, document: &str) -> Result<String, PublishError> {
        if !self.refinements_dir_exists().await? {
            log::info!("Creating {} directory", REFINEMENTS_DIR);
            self.write_file(
                "creating the refinements directory",
                &format!("{}/.gitkeep", REFINEMENTS_DIR),
                "",
                "Create refinements directory",
            )
            .await?;
        }

        let path = definition_path(table_id);
        let sha = self
            .write_file(
                "committing the view definition",
                &path,
                document,
                &format!("Add LookML view for {}", table_id),
            )
            .await?;
        log::info!("Committed {} to {}/{}", path, self.settings.owner, self.settings.repo);

        if let Err(e) = self.trigger_deploy().await {
            return Err(PublishError::NotDeployed {
                committed: CommittedDefinition { path, sha },
                source: Box::new(e),
            });
        }
        tokio::time::sleep(self.settings.settle).await;
        Ok(path)
    }

    async fn retract(&self, definition: &CommittedDefinition) -> Result<(), PublishError> {
        const STEP: &str = "removing the view definition";
        let response = self
            .github(reqwest::Method::DELETE, &definition.path)
            .json(&json!({
                "message": format!("Remove undeployed LookML view {}", definition.path),
                "sha": definition.sha,
                "branch": self.settings.branch,
                "committer": {
                    "name": COMMITTER_NAME,
                    "email": COMMITTER_EMAIL,
                },
            }))
            .send()
            .await
            .map_err(|source| PublishError::Transport { step: STEP, source })?;
        ensure_success(STEP, response).await?;
        log::info!("Removed {} from {}/{}", definition.path, self.settings.owner, self.settings.repo);
        Ok(())
    }
}
