//! Tracks the stage reached by each ingestion job.
//!
//! Uploads run to completion inside their own request, so this is not a queue:
//! it only lets a client poll `GET /api/import/csv/status/{job_id}` while its
//! upload request is still open.
//!
//! The main components are:
//! - `JobsState`: a clonable, thread-safe handle injected into the Actix application
//!   state in `main.rs`.
//! - `JobUpdate`: a message sent by the pipeline whenever a job changes stage.
//! - `start_job_updater`: a long-running task that applies `JobUpdate` messages to
//!   the shared map and forgets finished jobs once their retention has passed.
//!
//! Jobs are keyed by the uploading user as well as the job id, so a client-chosen
//! id never exposes or overwrites another user's job.

use common::jobs::IngestState;
use std::time::{Duration, Instant};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub user_id: String,
    pub job_id: String,
}

impl JobKey {
    pub fn new(user_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            job_id: job_id.into(),
        }
    }
}

#[derive(Debug)]
struct JobEntry {
    state: IngestState,
    updated_at: Instant,
}

#[derive(Clone)]
pub struct JobsState {
    jobs: Arc<RwLock<HashMap<JobKey, JobEntry>>>,

    /// Sender handed to pipeline runs; updates are applied by `start_job_updater`.
    pub tx: mpsc::Sender<JobUpdate>,

    /// How long a finished job stays visible.
    retention: Duration,
}

impl JobsState {
    pub fn new(tx: mpsc::Sender<JobUpdate>, retention: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            tx,
            retention,
        }
    }

    pub async fn state_of(&self, key: &JobKey) -> Option<IngestState> {
        self.jobs.read().await.get(key).map(|entry| entry.state.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUpdate {
    pub(crate) key: JobKey,
    pub(crate) state: IngestState,
}

/// Applies updates from `rx` to `state.jobs` until every sender is dropped.
pub async fn start_job_updater(state: JobsState, mut rx: mpsc::Receiver<JobUpdate>) {
    while let Some(update) = rx.recv().await {
        let mut jobs = state.jobs.write().await;
        jobs.insert(
            update.key,
            JobEntry {
                state: update.state,
                updated_at: Instant::now(),
            },
        );
        jobs.retain(|_, entry| {
            !entry.state.is_terminal() || entry.updated_at.elapsed() < state.retention
        });
    }
}
