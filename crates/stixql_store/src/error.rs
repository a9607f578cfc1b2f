use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend rejected a query or lost the connection mid-transaction.
    #[error("store backend: {0}")]
    Backend(String),

    /// A transaction could not be committed; all of its queries rolled back.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// The store is not reachable at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
