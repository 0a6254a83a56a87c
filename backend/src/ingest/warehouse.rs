//! Loading staged CSV files into the analytic warehouse and reading back their schema.

use crate::gcp_auth::{TokenError, TokenSource};
use async_trait::async_trait;
use common::model::column::ColumnDescriptor;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const JOB_POLL_LIMIT: u32 = 600;

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("authentication failed: {0}")]
    Auth(#[from] TokenError),
    #[error("warehouse request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("warehouse rejected the request with {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("load job {job_id} failed: {reason}")]
    LoadFailed { job_id: String, reason: String },
    #[error("load job {0} did not finish in time")]
    Timeout(String),
    #[error("table {0} not found")]
    TableNotFound(String),
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A load of one staged CSV object into one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub source_uri: String,
    pub table_id: String,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Creates or replaces `table_id` from the CSV at `source_uri`.
    ///
    /// The first row is a header, column types are detected from the data and any
    /// existing rows are truncated, so repeating a load never duplicates data.
    async fn load_csv(&self, request: &LoadRequest) -> Result<(), WarehouseError>;

    /// Columns of `table_id` in physical order, exactly as materialized.
    async fn table_columns(&self, table_id: &str) -> Result<Vec<ColumnDescriptor>, WarehouseError>;

    async fn drop_table(&self, table_id: &str) -> Result<(), WarehouseError>;

    /// Fully qualified, quoted name used in responses and in `sql_table_name`.
    fn qualified_name(&self, table_id: &str) -> String;
}

/// Bounded retry policy for the load step: fixed delay, no backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Runs the load up to `policy.max_attempts` times against the same table.
pub async fn load_with_retry(
    warehouse: &dyn Warehouse,
    request: &LoadRequest,
    policy: RetryPolicy,
) -> Result<(), WarehouseError> {
    let mut attempt = 1;
    loop {
        match warehouse.load_csv(request).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= policy.max_attempts => {
                log::error!(
                    "Load of {} into {} failed after {} attempts: {}",
                    request.source_uri,
                    request.table_id,
                    attempt,
                    e
                );
                return Err(e);
            }
            Err(e) => {
                log::warn!(
                    "Load attempt {}/{} for {} failed: {}",
                    attempt,
                    policy.max_attempts,
                    request.table_id,
                    e
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BigQuerySettings {
    /// `https://bigquery.googleapis.com` or an emulator root.
    pub api_url: String,
    pub project_id: String,
    pub dataset_id: String,
    pub location: String,
    /// Delay between load job status checks.
    pub poll_interval: Duration,
}

/// BigQuery through its v2 REST API.
pub struct BigQueryWarehouse {
    client: reqwest::Client,
    tokens: Arc<TokenSource>,
    settings: BigQuerySettings,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    status: Option<JobStatusResource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusResource {
    state: String,
    error_result: Option<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct TableResource {
    schema: Option<TableSchema>,
}

#[derive(Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableField>,
}

#[derive(Deserialize)]
struct TableField {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
}

impl BigQueryWarehouse {
    pub fn new(client: reqwest::Client, tokens: Arc<TokenSource>, settings: BigQuerySettings) -> Self {
        Self {
            client,
            tokens,
            settings,
        }
    }

    fn project_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}",
            self.settings.api_url, self.settings.project_id
        )
    }

    fn table_url(&self, table_id: &str) -> String {
        format!(
            "{}/datasets/{}/tables/{}",
            self.project_url(),
            self.settings.dataset_id,
            table_id
        )
    }

    /// Load job configuration: CSV, one header row, autodetect, truncate.
    fn load_job_body(&self, request: &LoadRequest) -> serde_json::Value {
        json!({
            "jobReference": {
                "projectId": self.settings.project_id,
                "location": self.settings.location,
            },
            "configuration": {
                "load": {
                    "sourceUris": [request.source_uri],
                    "destinationTable": {
                        "projectId": self.settings.project_id,
                        "datasetId": self.settings.dataset_id,
                        "tableId": request.table_id,
                    },
                    "sourceFormat": "CSV",
                    "skipLeadingRows": 1,
                    "autodetect": true,
                    "writeDisposition": "WRITE_TRUNCATE",
                }
            }
        })
    }

    async fn wait_for_job(&self, mut job: JobResource) -> Result<(), WarehouseError> {
        let job_id = job.job_reference.job_id.clone();
        for _ in 0..JOB_POLL_LIMIT {
            if let Some(status) = &job.status {
                if status.state == "DONE" {
                    return match &status.error_result {
                        Some(err) => Err(WarehouseError::LoadFailed {
                            job_id,
                            reason: format!(
                                "{}: {}",
                                err.reason.as_deref().unwrap_or("error"),
                                err.message.as_deref().unwrap_or("no message")
                            ),
                        }),
                        None => Ok(()),
                    };
                }
            }
            tokio::time::sleep(self.settings.poll_interval).await;

            let token = self.tokens.access_token().await?;
            let url = format!("{}/jobs/{}", self.project_url(), job_id);
            let response = self
                .client
                .get(&url)
                .query(&[("location", self.settings.location.as_str())])
                .bearer_auth(token)
                .send()
                .await?;
            job = parse_json(response).await?;
        }
        Err(WarehouseError::Timeout(job_id))
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, WarehouseError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(WarehouseError::Rejected { status, body });
    }
    Ok(response.json().await?)
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn load_csv(&self, request: &LoadRequest) -> Result<(), WarehouseError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .post(format!("{}/jobs", self.project_url()))
            .bearer_auth(token)
            .json(&self.load_job_body(request))
            .send()
            .await?;
        let job: JobResource = parse_json(response).await?;
        log::info!(
            "BigQuery load job {} started for {}",
            job.job_reference.job_id,
            request.table_id
        );
        self.wait_for_job(job).await
    }

    async fn table_columns(&self, table_id: &str) -> Result<Vec<ColumnDescriptor>, WarehouseError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .get(self.table_url(table_id))
            .bearer_auth(token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(WarehouseError::TableNotFound(table_id.to_string()));
        }
        let table: TableResource = parse_json(response).await?;
        Ok(table
            .schema
            .map(|schema| schema.fields)
            .unwrap_or_default()
            .into_iter()
            .map(|field| ColumnDescriptor::new(field.name, field.field_type))
            .collect())
    }

    async fn drop_table(&self, table_id: &str) -> Result<(), WarehouseError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .delete(self.table_url(table_id))
            .bearer_auth(token)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(WarehouseError::Rejected { status, body })
    }

    fn qualified_name(&self, table_id: &str) -> String {
        format!(
            "`{}.{}.{}`",
            self.settings.project_id, self.settings.dataset_id, table_id
        )
    }
}
