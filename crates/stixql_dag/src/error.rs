use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DagError {
    /// The condensation produced a cycle, which is impossible for a correct
    /// SCC pass. Only reachable through an internal bookkeeping bug.
    #[error("dependency graph inconsistency: {0}")]
    Inconsistent(String),
}
