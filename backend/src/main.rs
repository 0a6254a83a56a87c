mod config;
mod error;
mod gcp_auth;
mod ingest;
mod job_controller;
mod services;
mod session;

use crate::config::{Backend, Config};
use crate::gcp_auth::TokenSource;
use crate::ingest::publisher::{DefinitionPublisher, GitHubPublisher, GitHubSettings};
use crate::ingest::sqlite_warehouse::SqliteWarehouse;
use crate::ingest::staging::{GcsStagingStore, LocalStagingStore, StagingStore};
use crate::ingest::warehouse::{BigQuerySettings, BigQueryWarehouse, RetryPolicy, Warehouse};
use crate::ingest::Pipeline;
use crate::job_controller::state::JobsState;
use crate::services::session::SessionState;
use crate::session::SessionCipher;
use actix_web::{web, App, HttpServer};
use env_logger::Env;
use log::info;
use std::sync::Arc;
use tokio::sync::mpsc;

fn build_pipeline(config: &Config, client: &reqwest::Client) -> Pipeline {
    let tokens = Arc::new(TokenSource::new(
        client.clone(),
        config.metadata_url.clone(),
        config.google_access_token.clone(),
    ));

    let (staging, warehouse): (Arc<dyn StagingStore>, Arc<dyn Warehouse>) = match &config.backend {
        Backend::Gcp => (
            Arc::new(GcsStagingStore::new(
                client.clone(),
                tokens.clone(),
                config.gcs_api_url.clone(),
                config.bucket_name.clone(),
            )),
            Arc::new(BigQueryWarehouse::new(
                client.clone(),
                tokens,
                BigQuerySettings {
                    api_url: config.bigquery_api_url.clone(),
                    project_id: config.project_id.clone(),
                    dataset_id: config.dataset_id.clone(),
                    location: config.bigquery_location.clone(),
                    poll_interval: config.load_poll_interval,
                },
            )),
        ),
        Backend::Local { data_dir } => {
            info!("Using local staging and warehouse under {}", data_dir.display());
            (
                Arc::new(LocalStagingStore::new(data_dir.join("staging"))),
                Arc::new(SqliteWarehouse::new(
                    data_dir.join("warehouse.sqlite"),
                    config.project_id.clone(),
                    config.dataset_id.clone(),
                )),
            )
        }
    };

    let publisher: Arc<dyn DefinitionPublisher> = Arc::new(GitHubPublisher::new(
        client.clone(),
        GitHubSettings {
            api_url: config.github_api_url.clone(),
            token: config.github_token.clone(),
            owner: config.github_owner.clone(),
            repo: config.github_repo.clone(),
            branch: config.github_branch.clone(),
            deploy_webhook_url: config.deploy_webhook_url(),
            deploy_secret: config.looker_webhook_secret.clone(),
            settle: config.deploy_settle,
        },
    ));

    Pipeline::new(
        staging,
        warehouse,
        publisher,
        config.project_id.clone(),
        config.dataset_id.clone(),
        RetryPolicy {
            max_attempts: config.load_max_retries,
            delay: config.load_retry_delay,
        },
    )
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e));
        }
    };

    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let pipeline = web::Data::new(build_pipeline(&config, &client));
    let session_state = web::Data::new(SessionState {
        cipher: SessionCipher::new(&config.session_secret),
        secure_cookies: config.production,
    });

    // Job stage tracking
    let (tx, rx) = mpsc::channel(100);
    let jobs_state = web::Data::new(JobsState::new(tx, config.job_retention));

    let updater_state = jobs_state.get_ref().clone();
    tokio::spawn(async move {
        job_controller::state::start_job_updater(updater_state, rx).await;
    });

    info!(
        "Server running at http://{}:{} (production: {}, retries: {})",
        config.host, config.port, config.production, config.load_max_retries
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::JsonConfig::default().limit(64 * 1024))
            .app_data(pipeline.clone())
            .app_data(jobs_state.clone())
            .app_data(session_state.clone())
            .service(services::import::csv::configure_routes())
            .service(services::session::configure_routes())
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
