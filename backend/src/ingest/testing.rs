//! Test doubles for the pipeline collaborators, and a local HTTP server the
//! REST-backed collaborators can be pointed at.

use super::publisher::{self, CommittedDefinition, DefinitionPublisher, PublishError};
use super::staging::{StagedObject, StagingError, StagingStore};
use super::warehouse::{LoadRequest, Warehouse, WarehouseError};
use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpRequest, HttpServer};
use async_trait::async_trait;
use common::model::column::ColumnDescriptor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// A request as seen by a stub server.
#[derive(Debug, Clone)]
pub struct Hit {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Hit {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Requests received by a stub server, in arrival order.
#[derive(Default)]
pub struct Hits(Mutex<Vec<Hit>>);

impl Hits {
    pub fn record(&self, req: &HttpRequest, body: &[u8]) -> usize {
        let mut hits = self.0.lock().unwrap();
        hits.push(Hit {
            method: req.method().to_string(),
            path: req.path().to_string(),
            query: req.query_string().to_string(),
            headers: req
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect(),
            body: body.to_vec(),
        });
        hits.len()
    }

    pub fn all(&self) -> Vec<Hit> {
        self.0.lock().unwrap().clone()
    }

    /// `METHOD /path` of every hit, for order assertions.
    pub fn summary(&self) -> Vec<String> {
        self.all()
            .iter()
            .map(|hit| format!("{} {}", hit.method, hit.path))
            .collect()
    }
}

/// An actix server on an ephemeral local port.
pub struct StubServer {
    pub url: String,
    handle: ServerHandle,
}

impl StubServer {
    pub async fn start<F>(configure: F) -> Self
    where
        F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
    {
        let server = HttpServer::new(move || App::new().configure(configure.clone()))
            .workers(1)
            .disable_signals()
            .bind(("127.0.0.1", 0))
            .unwrap();
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        StubServer {
            url: format!("http://{}", addr),
            handle,
        }
    }

    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}

/// Fails the first `failures` loads, then succeeds.
pub struct FlakyWarehouse {
    pub failures: u32,
    pub attempts: AtomicU32,
    pub columns: Vec<ColumnDescriptor>,
    pub fail_introspection: bool,
    pub dropped: Mutex<Vec<String>>,
}

impl FlakyWarehouse {
    pub fn new(failures: u32, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
            columns,
            fail_introspection: false,
            dropped: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Warehouse for FlakyWarehouse {
    async fn load_csv(&self, request: &LoadRequest) -> Result<(), WarehouseError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(WarehouseError::LoadFailed {
                job_id: format!("job-{}", attempt),
                reason: format!("transient failure loading {}", request.table_id),
            });
        }
        Ok(())
    }

    async fn table_columns(&self, table_id: &str) -> Result<Vec<ColumnDescriptor>, WarehouseError> {
        if self.fail_introspection {
            return Err(WarehouseError::TableNotFound(table_id.to_string()));
        }
        Ok(self.columns.clone())
    }

    async fn drop_table(&self, table_id: &str) -> Result<(), WarehouseError> {
        self.dropped.lock().unwrap().push(table_id.to_string());
        Ok(())
    }

    fn qualified_name(&self, table_id: &str) -> String {
        format!("`test.dataset.{}`", table_id)
    }
}

#[derive(Default)]
pub struct RecordingStaging {
    pub objects: Mutex<Vec<String>>,
}

#[async_trait]
impl StagingStore for RecordingStaging {
    async fn put(
        &self,
        object_name: &str,
        _bytes: &[u8],
        _content_type: &str,
    ) -> Result<StagedObject, StagingError> {
        self.objects.lock().unwrap().push(object_name.to_string());
        Ok(StagedObject {
            object_name: object_name.to_string(),
            uri: format!("gs://bucket/{}", object_name),
        })
    }
}

/// How a `RecordingPublisher` ends a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishOutcome {
    #[default]
    Deployed,
    /// Nothing reaches the repository.
    CommitRejected,
    /// The document is committed but the deploy webhook fails.
    DeployRejected,
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub outcome: PublishOutcome,
    pub fail_retract: bool,
    pub documents: Mutex<Vec<(String, String)>>,
    pub retracted: Mutex<Vec<CommittedDefinition>>,
}

impl RecordingPublisher {
    pub fn ending_with(outcome: PublishOutcome) -> Self {
        Self {
            outcome,
            ..Default::default()
        }
    }
}

fn rejected(step: &'static str) -> PublishError {
    PublishError::Rejected {
        step,
        status: reqwest::StatusCode::CONFLICT,
        body: String::new(),
    }
}

#[async_trait]
impl DefinitionPublisher for RecordingPublisher {
    async fn publish(&self, table_id: &str, document: &str) -> Result<String, PublishError> {
        if self.outcome == PublishOutcome::CommitRejected {
            return Err(rejected("committing the view definition"));
        }
        self.documents
            .lock()
            .unwrap()
            .push((table_id.to_string(), document.to_string()));
        let path = publisher::definition_path(table_id);
        if self.outcome == PublishOutcome::DeployRejected {
            return Err(PublishError::NotDeployed {
                committed: CommittedDefinition {
                    path,
                    sha: "sha-1".to_string(),
                },
                source: Box::new(rejected("deploy webhook")),
            });
        }
        Ok(path)
    }

    async fn retract(&self, definition: &CommittedDefinition) -> Result<(), PublishError> {
        if self.fail_retract {
            return Err(rejected("removing the view definition"));
        }
        self.retracted.lock().unwrap().push(definition.clone());
        Ok(())
    }
}
