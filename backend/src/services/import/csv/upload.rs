use crate::error::IngestError;
use crate::ingest::{parse_join_config, validate_file_name, Pipeline, Upload};
use crate::job_controller::state::JobsState;
use crate::session;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use common::responses::UploadResponse;
use futures_util::StreamExt;

/// Parts of the upload form, in whatever order the client sent them.
#[derive(Default)]
struct UploadForm {
    file_name: Option<String>,
    bytes: Vec<u8>,
    joins: Option<Vec<u8>>,
    job_id: Option<String>,
}

impl UploadForm {
    fn into_upload(self, user_id: String) -> Result<Upload, IngestError> {
        let file_name = self.file_name.ok_or(IngestError::MissingField("file"))?;
        let joins = parse_join_config(&self.joins.ok_or(IngestError::MissingField("joins"))?)?;
        let job_id = self
            .job_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Upload {
            job_id,
            user_id,
            file_name,
            bytes: self.bytes,
            joins,
        })
    }
}

/// HTTP handler wrapper that converts the pipeline result to an `HttpResponse`.
///
/// - On success: `200 OK` with an `UploadResponse`.
/// - On failure: the `IngestError` status (400, 401 or 500) with an `ErrorEnvelope`.
pub async fn process(
    req: HttpRequest,
    payload: Multipart,
    pipeline: web::Data<Pipeline>,
    jobs: web::Data<JobsState>,
) -> HttpResponse {
    match import_csv(req, payload, &pipeline, &jobs).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => {
            if e.is_client_error() {
                log::warn!("Rejected CSV upload: {}", e);
            } else {
                log::error!("Error processing CSV upload: {}", e);
            }
            e.error_response()
        }
    }
}

async fn import_csv(
    req: HttpRequest,
    payload: Multipart,
    pipeline: &Pipeline,
    jobs: &JobsState,
) -> Result<UploadResponse, IngestError> {
    let user_id = session::user_id(&req).ok_or(IngestError::Unauthenticated)?;
    let upload = read_upload_form(payload).await?.into_upload(user_id)?;
    let job_id = upload.job_id.clone();

    log::info!(
        "Accepted {} ({} bytes) as job {}",
        upload.file_name,
        upload.bytes.len(),
        job_id
    );
    let outcome = pipeline.run(upload, &jobs.tx).await?;
    log::info!(
        "Job {} loaded {} and published {}",
        job_id,
        outcome.table_id,
        outcome.definition_path
    );

    Ok(UploadResponse {
        message: "File uploaded to GCS and loaded into BigQuery successfully".to_string(),
        gcs_path: outcome.staging_uri,
        bigquery_table: outcome.qualified_table,
        job_id,
    })
}

/// Reads the multipart stream, rejecting a bad file name before its bytes are read.
async fn read_upload_form(mut payload: Multipart) -> Result<UploadForm, IngestError> {
    let mut form = UploadForm::default();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| IngestError::Multipart(e.to_string()))?;
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(|n| n.to_string()));

        match name.as_deref() {
            Some("file") => {
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename().map(|f| f.to_string()))
                    .unwrap_or_default();
                validate_file_name(&file_name)?;
                form.bytes = read_field(&mut field).await?;
                form.file_name = Some(file_name);
            }
            Some("joins") => form.joins = Some(read_field(&mut field).await?),
            Some("job_id") => {
                let raw = read_field(&mut field).await?;
                form.job_id = Some(String::from_utf8_lossy(&raw).trim().to_string());
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn read_field(field: &mut Field) -> Result<Vec<u8>, IngestError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| IngestError::Multipart(e.to_string()))?;
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}
