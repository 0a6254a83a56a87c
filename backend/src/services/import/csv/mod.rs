//! HTTP API for importing CSV files as new explorable tables.
//!
//! The provided routes are:
//! - `POST /api/import/csv`: handles `multipart/form-data` uploads with a `file` field
//!   (`.csv` or `.csv.gz`), a `joins` field holding the JSON join configuration and an
//!   optional `job_id`. The upload is staged, loaded into the warehouse, described as a
//!   LookML view and published before the response is sent.
//!
//! - `GET /api/import/csv/status/{job_id}`: returns the stage an upload has reached
//!   (`Validated`, `Staged`, `Loaded`, `Introspected`, `DocumentGenerated`, `Published`
//!   or `Failed`) from the shared `JobsState`, so a client can show progress while its
//!   upload request is still open. Jobs are looked up under the caller's `looker_user_id`
//!   cookie; without it the request is a 401.

use actix_web::web::{get, post, scope};
use actix_web::Scope;

mod get_status;
mod upload;

const API_PATH: &str = "/api/import/csv";

/// Configures and returns the Actix scope for CSV import routes.
pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("", post().to(upload::process))
        .route("/status/{job_id}", get().to(get_status::process))
}
