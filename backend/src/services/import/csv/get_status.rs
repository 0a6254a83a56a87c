use crate::error::IngestError;
use crate::job_controller::state::{JobKey, JobsState};
use crate::session;
use actix_web::{web, HttpRequest, HttpResponse, Responder, ResponseError};
use common::responses::ErrorEnvelope;

pub(crate) async fn process(
    req: HttpRequest,
    job_id: web::Path<String>,
    state: web::Data<JobsState>,
) -> impl Responder {
    get_ingest_job_status(req, job_id, state).await
}

async fn get_ingest_job_status(
    req: HttpRequest,
    job_id: web::Path<String>,
    state: web::Data<JobsState>,
) -> HttpResponse {
    let Some(user_id) = session::user_id(&req) else {
        return IngestError::Unauthenticated.error_response();
    };
    match state.state_of(&JobKey::new(user_id, job_id.into_inner())).await {
        Some(status) => HttpResponse::Ok().json(status),
        None => HttpResponse::NotFound().json(ErrorEnvelope {
            message: "Job ID not found".to_string(),
            error: None,
        }),
    }
}
