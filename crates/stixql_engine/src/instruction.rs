use serde::{Deserialize, Serialize};

use stixql_compile::Fragment;
use stixql_core::DocId;

/// Lifecycle of one document inside a batch.
///
/// `Created → CreatedQuery → {Success | Error}` is the happy path; the
/// remaining states are terminal short-circuits decided before any query
/// compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Encoded; waiting for scheduling.
    Created,
    /// Query text compiled; waiting for execution.
    CreatedQuery,
    /// Transaction committed.
    Success,
    /// Encode or transaction failure; `error` holds the message.
    Error,
    /// A referenced identity is in neither the batch nor the database.
    FailedMissingDependency,
    /// Member of a reference cycle that cannot be phase-split.
    FailedCyclical,
    /// The identity is already stored; nothing to do.
    ExcludeExistsInDatabase,
}

impl Status {
    /// Terminal states never re-enter scheduling.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Created | Status::CreatedQuery)
    }
}

/// Per-document execution record carried through the insert pipeline.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub id: DocId,
    /// Submission index within the batch; scheduling tie-break key.
    pub index: usize,
    pub status: Status,
    pub fragment: Option<Fragment>,
    /// Combined single-transaction query, or the phase-1 query of a split.
    pub query: Option<String>,
    /// Phase-2 query when the document is part of a contracted cycle.
    pub phase_two: Option<String>,
    /// Referenced identities found in neither the batch nor the database.
    pub missing: Vec<DocId>,
    pub error: Option<String>,
}

impl Instruction {
    pub fn new(id: DocId, index: usize) -> Self {
        Instruction {
            id,
            index,
            status: Status::Created,
            fragment: None,
            query: None,
            phase_two: None,
            missing: Vec::new(),
            error: None,
        }
    }

    pub fn fail(&mut self, status: Status, error: impl Into<String>) {
        self.status = status;
        self.error = Some(error.into());
    }
}
