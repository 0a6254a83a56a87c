use serde::Serialize;

/// Stage reached by an ingestion job.
///
/// Jobs move strictly forward through
/// `Validated → Staged → Loaded → Introspected → DocumentGenerated → Published`,
/// or end in `Failed` from any stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum IngestState {
    Validated,
    Staged,
    Loaded,
    Introspected,
    DocumentGenerated,
    Published,
    Failed(String),
}

impl IngestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestState::Published | IngestState::Failed(_))
    }
}
