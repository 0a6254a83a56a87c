//! The CSV ingestion pipeline.
//!
//! One upload runs these steps in order, each starting only once the previous
//! one has produced its result:
//!
//! 1. stage the raw bytes as `<table_id>.csv` (`staging`);
//! 2. load them into `<table_id>` with retries (`warehouse`);
//! 3. read back the materialized columns;
//! 4. render the LookML view and optional explore refinement (`lookml`);
//! 5. commit it and trigger the Looker deploy (`publisher`).
//!
//! Each stage transition is reported as a `JobUpdate`. When a step after the
//! load fails, the table is dropped again so no table is left without a view
//! definition. A definition that was committed but never deployed is removed
//! first; if that removal fails the table is kept so the committed view still
//! points at a real table.

pub mod lookml;
pub mod publisher;
pub mod sqlite_warehouse;
pub mod staging;
pub mod warehouse;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::IngestError;
use crate::job_controller::state::{JobKey, JobUpdate};
use common::jobs::IngestState;
use common::model::join::JoinConfig;
use once_cell::sync::Lazy;
use publisher::{CommittedDefinition, DefinitionPublisher};
use regex::Regex;
use staging::StagingStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;
use warehouse::{load_with_retry, LoadRequest, RetryPolicy, Warehouse};

static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]").unwrap());

const ACCEPTED_EXTENSIONS: [&str; 2] = [".csv", ".csv.gz"];

/// Rejects anything that is not a plain or gzip-compressed CSV file name.
pub fn validate_file_name(file_name: &str) -> Result<(), IngestError> {
    if ACCEPTED_EXTENSIONS.iter().any(|ext| file_name.ends_with(ext)) {
        Ok(())
    } else {
        Err(IngestError::InvalidExtension)
    }
}

/// Parses and validates the `joins` form field.
pub fn parse_join_config(raw: &[u8]) -> Result<JoinConfig, IngestError> {
    let config: JoinConfig = serde_json::from_slice(raw)
        .map_err(|e| IngestError::InvalidJoinConfig(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// `table_<random>_<user>_<file name>` with every non-alphanumeric character replaced.
pub fn table_id_for(suffix: &str, user_id: &str, file_name: &str) -> String {
    format!(
        "table_{}_{}_{}",
        NON_ALPHANUMERIC.replace_all(suffix, ""),
        NON_ALPHANUMERIC.replace_all(user_id, "_"),
        NON_ALPHANUMERIC.replace_all(file_name, "_")
    )
}

pub fn generate_table_id(user_id: &str, file_name: &str) -> String {
    table_id_for(&Uuid::new_v4().simple().to_string(), user_id, file_name)
}

fn content_type(file_name: &str) -> &'static str {
    if file_name.ends_with(".gz") {
        "application/gzip"
    } else {
        "text/csv"
    }
}

/// A validated upload ready to run through the pipeline.
#[derive(Debug, Clone)]
pub struct Upload {
    pub job_id: String,
    pub user_id: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub joins: JoinConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub table_id: String,
    pub staging_uri: String,
    pub qualified_table: String,
    pub definition_path: String,
}

pub struct Pipeline {
    staging: Arc<dyn StagingStore>,
    warehouse: Arc<dyn Warehouse>,
    publisher: Arc<dyn DefinitionPublisher>,
    project_id: String,
    dataset_id: String,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        warehouse: Arc<dyn Warehouse>,
        publisher: Arc<dyn DefinitionPublisher>,
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            staging,
            warehouse,
            publisher,
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            retry,
        }
    }

    /// Runs one upload to completion, reporting every stage on `updates`.
    pub async fn run(
        &self,
        upload: Upload,
        updates: &mpsc::Sender<JobUpdate>,
    ) -> Result<IngestOutcome, IngestError> {
        let table_id = generate_table_id(&upload.user_id, &upload.file_name);
        let key = JobKey::new(&upload.user_id, &upload.job_id);
        report(updates, &key, IngestState::Validated).await;

        match self.run_stages(&table_id, upload, &key, updates).await {
            Ok(outcome) => {
                report(updates, &key, IngestState::Published).await;
                Ok(outcome)
            }
            Err(e) => {
                log::error!("Ingestion job {} ({}) failed: {}", key.job_id, table_id, e);
                report(updates, &key, IngestState::Failed(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        table_id: &str,
        upload: Upload,
        job: &JobKey,
        updates: &mpsc::Sender<JobUpdate>,
    ) -> Result<IngestOutcome, IngestError> {
        let object_name = format!("{}.csv", table_id);

        log::info!("Staging {} as {}", upload.file_name, object_name);
        let staged = self
            .staging
            .put(&object_name, &upload.bytes, content_type(&upload.file_name))
            .await?;
        log::info!("Staged {} at {}", staged.object_name, staged.uri);
        report(updates, job, IngestState::Staged).await;

        log::info!("Loading {} into {}", staged.uri, table_id);
        let request = LoadRequest {
            source_uri: staged.uri.clone(),
            table_id: table_id.to_string(),
        };
        load_with_retry(self.warehouse.as_ref(), &request, self.retry)
            .await
            .map_err(IngestError::Load)?;
        report(updates, job, IngestState::Loaded).await;

        let columns = match self.warehouse.table_columns(table_id).await {
            Ok(columns) => columns,
            Err(e) => {
                self.compensate(table_id, None).await;
                return Err(IngestError::Introspection(e));
            }
        };
        log::info!("Table {} has {} columns", table_id, columns.len());
        report(updates, job, IngestState::Introspected).await;

        let document = lookml::generate_lookml(&lookml::ViewSource {
            table_id,
            columns: &columns,
            project_id: &self.project_id,
            dataset_id: &self.dataset_id,
            view_label: &upload.file_name,
            joins: &upload.joins,
        });
        report(updates, job, IngestState::DocumentGenerated).await;

        let definition_path = match self.publisher.publish(table_id, &document).await {
            Ok(path) => path,
            Err(e) => {
                self.compensate(table_id, e.committed()).await;
                return Err(e.into());
            }
        };

        Ok(IngestOutcome {
            table_id: table_id.to_string(),
            staging_uri: staged.uri,
            qualified_table: self.warehouse.qualified_name(table_id),
            definition_path,
        })
    }

    /// Undoes a load whose view definition did not make it into production.
    async fn compensate(&self, table_id: &str, committed: Option<&CommittedDefinition>) {
        if let Some(definition) = committed {
            if let Err(e) = self.publisher.retract(definition).await {
                log::error!(
                    "Could not remove {} after failed deploy, keeping table {}: {}",
                    definition.path,
                    table_id,
                    e
                );
                return;
            }
            log::warn!("Removed undeployed definition {}", definition.path);
        }
        match self.warehouse.drop_table(table_id).await {
            Ok(()) => log::warn!("Dropped {} after failed ingestion", table_id),
            Err(e) => log::error!(
                "Could not drop {} after failed ingestion, manual cleanup needed: {}",
                table_id,
                e
            ),
        }
    }
}

async fn report(updates: &mpsc::Sender<JobUpdate>, job: &JobKey, state: IngestState) {
    let update = JobUpdate {
        key: job.clone(),
        state,
    };
    if updates.send(update).await.is_err() {
        log::debug!("Job updater gone, dropping update for {}", job.job_id);
    }
}
