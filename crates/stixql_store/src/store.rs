use std::collections::BTreeSet;

use stixql_core::{DocId, ResultNode};

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Backend abstraction over the typed graph database.
///
/// The engine only ever hands the store finished query text; all schema
/// awareness lives above this trait. Each `execute_*` call is one
/// transaction: every query in the slice commits together or not at all.
pub trait GraphStore {
    /// Human-readable backend name, used in logs and batch reports.
    fn store_name(&self) -> &str;

    /// Whether the backend is reachable and ready for queries.
    fn is_ready(&self) -> StoreResult<bool>;

    /// Run insert queries in one transaction.
    fn execute_insert(&self, queries: &[String]) -> StoreResult<()>;

    /// Run match-delete queries in one transaction.
    fn execute_delete(&self, queries: &[String]) -> StoreResult<()>;

    /// Which of the given identities already exist in the database. Callers
    /// batch; implementations answer for exactly the ids asked.
    fn existing_ids(&self, ids: &[DocId]) -> StoreResult<BTreeSet<DocId>>;

    /// Fetch the stored object graph rooted at one identity as a typed
    /// result tree, or `None` when the identity is absent.
    fn fetch(&self, id: &DocId) -> StoreResult<Option<ResultNode>>;
}

/// No-op store: every write succeeds, nothing exists, nothing is returned.
/// Lets the pipeline run end to end with the database switched off.
#[derive(Debug, Clone, Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

impl GraphStore for NullStore {
    fn store_name(&self) -> &str {
        "null"
    }

    fn is_ready(&self) -> StoreResult<bool> {
        Ok(true)
    }

    fn execute_insert(&self, _queries: &[String]) -> StoreResult<()> {
        Ok(())
    }

    fn execute_delete(&self, _queries: &[String]) -> StoreResult<()> {
        Ok(())
    }

    fn existing_ids(&self, _ids: &[DocId]) -> StoreResult<BTreeSet<DocId>> {
        Ok(BTreeSet::new())
    }

    fn fetch(&self, _id: &DocId) -> StoreResult<Option<ResultNode>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_store_is_always_ready_and_empty() {
        let store = NullStore::new();
        assert!(store.is_ready().unwrap());
        assert_eq!(store.store_name(), "null");
        store
            .execute_insert(&["insert $x isa malware; ".to_string()])
            .unwrap();
        let id: DocId = "malware--31b940d4-6f7f-459a-80ea-9c1f17b58abb"
            .parse()
            .unwrap();
        assert!(store.existing_ids(&[id.clone()]).unwrap().is_empty());
        assert!(store.fetch(&id).unwrap().is_none());
    }
}
