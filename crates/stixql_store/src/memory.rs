use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use tracing::debug;

use stixql_core::{DocId, ResultNode};

use crate::error::StoreError;
use crate::store::{GraphStore, StoreResult};

/// In-memory behavioural double of a graph backend.
///
/// It does not evaluate query text; it tracks the identities the engine
/// inserts and deletes by reading `has stix-id "<id>"` clauses, so the
/// pipeline's ordering, existence and failure behaviour can be tested
/// without a database. Typed result trees for `fetch` are preloaded by the
/// test through [`MemoryStore::put_tree`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    ids: BTreeSet<DocId>,
    trees: BTreeMap<DocId, ResultNode>,
    insert_log: Vec<String>,
    delete_log: Vec<String>,
    fail_inserts_containing: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pretend the identity already exists in the database.
    pub fn seed(&self, id: DocId) {
        self.inner().ids.insert(id);
    }

    /// Preload the typed result tree `fetch` returns for an identity.
    pub fn put_tree(&self, id: DocId, tree: ResultNode) {
        let mut inner = self.inner();
        inner.ids.insert(id.clone());
        inner.trees.insert(id, tree);
    }

    /// Make every insert transaction whose text contains `needle` fail.
    pub fn fail_inserts_containing(&self, needle: impl Into<String>) {
        self.inner().fail_inserts_containing = Some(needle.into());
    }

    pub fn contains(&self, id: &DocId) -> bool {
        self.inner().ids.contains(id)
    }

    /// Every insert transaction executed, in order, one string per query.
    pub fn insert_log(&self) -> Vec<String> {
        self.inner().insert_log.clone()
    }

    pub fn delete_log(&self) -> Vec<String> {
        self.inner().delete_log.clone()
    }
}

impl GraphStore for MemoryStore {
    fn store_name(&self) -> &str {
        "memory"
    }

    fn is_ready(&self) -> StoreResult<bool> {
        Ok(true)
    }

    fn execute_insert(&self, queries: &[String]) -> StoreResult<()> {
        let mut inner = self.inner();
        if let Some(needle) = &inner.fail_inserts_containing {
            if queries.iter().any(|q| q.contains(needle.as_str())) {
                return Err(StoreError::Aborted(format!(
                    "injected failure on `{needle}`"
                )));
            }
        }
        for query in queries {
            debug!(query, "memory store insert");
            // Only the insert section creates identities; ids in the match
            // section are pre-existing dependencies.
            let insert_section = match query.split_once("insert ") {
                Some((_, tail)) => tail,
                None => query.as_str(),
            };
            for id in stix_ids_in(insert_section) {
                inner.ids.insert(id);
            }
            inner.insert_log.push(query.clone());
        }
        Ok(())
    }

    fn execute_delete(&self, queries: &[String]) -> StoreResult<()> {
        let mut inner = self.inner();
        for query in queries {
            debug!(query, "memory store delete");
            let (match_section, delete_section) = match query.split_once(" delete ") {
                Some(parts) => parts,
                None => continue,
            };
            // An identity dies when the delete section removes the variable
            // its core clause bound.
            for clause in match_section.split("; ") {
                let Some(var) = clause.split_whitespace().next() else {
                    continue;
                };
                if !var.starts_with('$') {
                    continue;
                }
                if !delete_section.contains(&format!("{var} isa ")) {
                    continue;
                }
                for id in stix_ids_in(clause) {
                    inner.ids.remove(&id);
                    inner.trees.remove(&id);
                }
            }
            inner.delete_log.push(query.clone());
        }
        Ok(())
    }

    fn existing_ids(&self, ids: &[DocId]) -> StoreResult<BTreeSet<DocId>> {
        let inner = self.inner();
        Ok(ids
            .iter()
            .filter(|id| inner.ids.contains(id))
            .cloned()
            .collect())
    }

    fn fetch(&self, id: &DocId) -> StoreResult<Option<ResultNode>> {
        Ok(self.inner().trees.get(id).cloned())
    }
}

/// All identities named by `has stix-id "<id>"` clauses in the text.
fn stix_ids_in(text: &str) -> Vec<DocId> {
    const NEEDLE: &str = "has stix-id \"";
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(at) = rest.find(NEEDLE) {
        rest = &rest[at + NEEDLE.len()..];
        if let Some(end) = rest.find('"') {
            if let Ok(id) = rest[..end].parse::<DocId>() {
                out.push(id);
            }
            rest = &rest[end..];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MALWARE_A: &str = "malware--31b940d4-6f7f-459a-80ea-9c1f17b58abb";
    const IDENTITY_A: &str = "identity--8c6af861-7b20-41ef-9b59-6344fd872a8f";

    fn id(raw: &str) -> DocId {
        raw.parse().unwrap()
    }

    #[test]
    fn tracks_inserted_identities() {
        let store = MemoryStore::new();
        store
            .execute_insert(&[format!(
                "insert $malware_0 isa malware, has stix-id \"{MALWARE_A}\"; "
            )])
            .unwrap();
        assert!(store.contains(&id(MALWARE_A)));
        assert_eq!(
            store.existing_ids(&[id(MALWARE_A), id(IDENTITY_A)]).unwrap(),
            [id(MALWARE_A)].into()
        );
    }

    #[test]
    fn match_section_ids_are_not_treated_as_inserts() {
        let store = MemoryStore::new();
        store
            .execute_insert(&[format!(
                "match $creator_1 isa identity, has stix-id \"{IDENTITY_A}\"; \
                 insert $malware_0 isa malware, has stix-id \"{MALWARE_A}\"; "
            )])
            .unwrap();
        assert!(store.contains(&id(MALWARE_A)));
        assert!(!store.contains(&id(IDENTITY_A)));
    }

    #[test]
    fn deleting_the_core_variable_removes_the_identity() {
        let store = MemoryStore::new();
        store.seed(id(MALWARE_A));
        store
            .execute_delete(&[format!(
                "match $malware_0 isa malware, has stix-id \"{MALWARE_A}\";  \
                 delete $malware_0 isa malware; "
            )])
            .unwrap();
        assert!(!store.contains(&id(MALWARE_A)));
    }

    #[test]
    fn attribute_only_deletes_keep_the_identity() {
        let store = MemoryStore::new();
        store.seed(id(MALWARE_A));
        store
            .execute_delete(&[format!(
                "match $malware_0 isa malware, has stix-id \"{MALWARE_A}\"; \
                 $malware_0 has name $name_1;  delete $name_1 isa name; "
            )])
            .unwrap();
        assert!(store.contains(&id(MALWARE_A)));
    }

    #[test]
    fn injected_failures_abort_the_whole_transaction() {
        let store = MemoryStore::new();
        store.fail_inserts_containing(MALWARE_A);
        let err = store
            .execute_insert(&[
                format!("insert $identity_0 isa identity, has stix-id \"{IDENTITY_A}\"; "),
                format!("insert $malware_0 isa malware, has stix-id \"{MALWARE_A}\"; "),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::Aborted(_)));
        assert!(!store.contains(&id(IDENTITY_A)));
    }
}
