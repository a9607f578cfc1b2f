use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use stixql_core::DocId;

use crate::instruction::{Instruction, Status};

/// Final status of one document in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
    AlreadyInDatabase,
    MissingDependency,
    CyclicalDependency,
}

/// Per-document result in a [`BatchReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: DocId,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Referenced identities that caused a `MissingDependency` outcome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<DocId>,
}

impl Outcome {
    pub(crate) fn from_instruction(instruction: &Instruction) -> Self {
        let status = match instruction.status {
            Status::Success => OutcomeStatus::Success,
            Status::ExcludeExistsInDatabase => OutcomeStatus::AlreadyInDatabase,
            Status::FailedMissingDependency => OutcomeStatus::MissingDependency,
            Status::FailedCyclical => OutcomeStatus::CyclicalDependency,
            // A non-terminal state at report time means the pipeline never
            // reached the document; surface it as an error.
            Status::Error | Status::Created | Status::CreatedQuery => OutcomeStatus::Error,
        };
        Outcome {
            id: instruction.id.clone(),
            status,
            error: instruction.error.clone(),
            missing: instruction.missing.clone(),
        }
    }
}

/// Record of one batch execution with lineage: which store, which schema
/// configuration, when, and what happened to every document. A batch with
/// zero successes is still a complete report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// `YYYYMMDD-HHMMSS-<hash8>`, unique per batch.
    pub batch_id: String,
    pub store: String,
    pub config_hash: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub outcomes: Vec<Outcome>,
}

impl BatchReport {
    pub(crate) fn begin(store: &str, config_hash: &str) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        BatchReport {
            batch_id: generate_batch_id(&now),
            store: store.to_string(),
            config_hash: config_hash.to_string(),
            started_at: now,
            finished_at: None,
            outcomes: Vec::new(),
        }
    }

    pub(crate) fn complete(&mut self, outcomes: Vec<Outcome>) {
        self.outcomes = outcomes;
        self.finished_at = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn outcome_for(&self, id: &DocId) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| &o.id == id)
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == OutcomeStatus::Success)
    }
}

fn generate_batch_id(timestamp: &str) -> String {
    let formatted = chrono::DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.format("%Y%m%d-%H%M%S").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let mut hasher = Sha256::new();
    hasher.update(timestamp.as_bytes());
    hasher.update(std::process::id().to_le_bytes());
    let hash = format!("{:x}", hasher.finalize());
    format!("{formatted}-{}", &hash[..8])
}
