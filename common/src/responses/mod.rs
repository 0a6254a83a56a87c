use serde::{Deserialize, Serialize};

/// Body returned by `POST /api/import/csv` once the view definition is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub gcs_path: String,
    /// Fully qualified, backtick-quoted destination table.
    pub bigquery_table: String,
    pub job_id: String,
}

/// Uniform error envelope for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
