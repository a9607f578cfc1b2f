use std::collections::BTreeMap;

use stixql_core::{DocId, Document};

/// Supplies documents for identities a batch references but does not
/// contain. The loader consults it exactly once per missing identity,
/// before falling back to store existence checks; a resolved document joins
/// the batch as if it had been submitted.
pub trait ReferenceResolver {
    fn resolve(&self, id: &DocId) -> Option<Document>;
}

/// Resolver over a fixed document set.
#[derive(Debug, Default)]
pub struct StaticResolver {
    docs: BTreeMap<DocId, Document>,
}

impl StaticResolver {
    pub fn new(docs: impl IntoIterator<Item = Document>) -> Self {
        StaticResolver {
            docs: docs.into_iter().map(|d| (d.id.clone(), d)).collect(),
        }
    }
}

impl ReferenceResolver for StaticResolver {
    fn resolve(&self, id: &DocId) -> Option<Document> {
        self.docs.get(id).cloned()
    }
}
