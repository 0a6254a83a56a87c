use crate::ingest::publisher::PublishError;
use crate::ingest::staging::StagingError;
use crate::ingest::warehouse::WarehouseError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use common::model::join::JoinConfigError;
use common::responses::ErrorEnvelope;

/// Everything that can stop an upload, from request validation to publishing.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("File must be a CSV or gzipped CSV")]
    InvalidExtension,
    #[error("Invalid join config: {0}")]
    InvalidJoinConfig(String),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Malformed upload: {0}")]
    Multipart(String),
    #[error("looker_user_id is required")]
    Unauthenticated,
    #[error("Failed to stage upload: {0}")]
    Staging(#[from] StagingError),
    #[error("Failed to write data to BigQuery: {0}")]
    Load(#[source] WarehouseError),
    #[error("Failed to read table schema: {0}")]
    Introspection(#[source] WarehouseError),
    #[error("Failed to write LookML to GitHub repository: {0}")]
    Publish(#[from] PublishError),
}

impl From<JoinConfigError> for IngestError {
    fn from(err: JoinConfigError) -> Self {
        IngestError::InvalidJoinConfig(err.to_string())
    }
}

impl IngestError {
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl ResponseError for IngestError {
    fn status_code(&self) -> StatusCode {
        match self {
            IngestError::InvalidExtension
            | IngestError::InvalidJoinConfig(_)
            | IngestError::MissingField(_)
            | IngestError::Multipart(_) => StatusCode::BAD_REQUEST,
            IngestError::Unauthenticated => StatusCode::UNAUTHORIZED,
            IngestError::Staging(_)
            | IngestError::Load(_)
            | IngestError::Introspection(_)
            | IngestError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let envelope = if self.is_client_error() {
            ErrorEnvelope {
                message: self.to_string(),
                error: None,
            }
        } else {
            ErrorEnvelope {
                message: "Failed to process CSV upload".to_string(),
                error: Some(self.to_string()),
            }
        };
        HttpResponse::build(self.status_code()).json(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn validation_errors_are_client_errors() {
        let err = IngestError::InvalidExtension;
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body()).await.unwrap();
        let envelope: ErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.message, "File must be a CSV or gzipped CSV");
        assert!(envelope.error.is_none());
    }

    #[actix_web::test]
    async fn server_errors_carry_detail() {
        let err = IngestError::Load(WarehouseError::Timeout("job-1".to_string()));
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body()).await.unwrap();
        let envelope: ErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.message, "Failed to process CSV upload");
        assert!(envelope.error.unwrap().contains("job-1"));
    }

    #[test]
    fn missing_cookie_is_unauthorized() {
        assert_eq!(
            IngestError::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
