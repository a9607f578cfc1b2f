use thiserror::Error;

use stixql_compile::CompileError;
use stixql_core::DocumentError;
use stixql_dag::DagError;
use stixql_schema::SchemaError;
use stixql_store::StoreError;

/// Batch-fatal errors. Per-document failures never surface here; they are
/// recorded as outcomes in the batch report.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Dag(#[from] DagError),

    /// The store failed outside any single document's transaction
    /// (readiness or existence queries).
    #[error(transparent)]
    Store(#[from] StoreError),
}
