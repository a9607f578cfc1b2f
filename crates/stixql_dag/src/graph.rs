use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use stixql_core::DocId;

/// Per-node bookkeeping. `order` is the batch-submission index for batch
/// members; referenced-only nodes carry `usize::MAX` so they never win a
/// tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMeta {
    pub in_batch: bool,
    pub order: usize,
}

/// Directed dependency graph over document identities. Edges run from a
/// referenced identity to the identity referencing it.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    nodes: BTreeMap<DocId, NodeMeta>,
    edges: Vec<(DocId, DocId)>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a batch member at its submission index. Idempotent; upgrades
    /// a node previously seen only as a reference.
    pub fn ensure_batch_node(&mut self, id: DocId, order: usize) {
        match self.nodes.entry(id) {
            Entry::Vacant(e) => {
                e.insert(NodeMeta {
                    in_batch: true,
                    order,
                });
            }
            Entry::Occupied(mut e) => {
                let meta = e.get_mut();
                if !meta.in_batch {
                    meta.in_batch = true;
                    meta.order = order;
                }
            }
        }
    }

    /// Register an identity that is referenced but (so far) not in the batch.
    pub fn ensure_ref_node(&mut self, id: DocId) {
        self.nodes.entry(id).or_insert(NodeMeta {
            in_batch: false,
            order: usize::MAX,
        });
    }

    /// Add a dependency edge: `dependency` must be inserted before
    /// `dependent`. Both endpoints are ensured as nodes.
    pub fn add_dependency(&mut self, dependency: DocId, dependent: DocId) {
        self.ensure_ref_node(dependency.clone());
        self.ensure_ref_node(dependent.clone());
        self.edges.push((dependency, dependent));
    }

    pub fn node(&self, id: &DocId) -> Option<&NodeMeta> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &BTreeMap<DocId, NodeMeta> {
        &self.nodes
    }

    pub fn edges(&self) -> &[(DocId, DocId)] {
        &self.edges
    }

    /// Identities present as nodes but not as batch members.
    pub fn external_ids(&self) -> BTreeSet<DocId> {
        self.nodes
            .iter()
            .filter(|(_, meta)| !meta.in_batch)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Adjacency (dependency → dependents) restricted to `live` nodes.
    pub fn adjacency_within(&self, live: &BTreeSet<DocId>) -> BTreeMap<DocId, Vec<DocId>> {
        let mut adj: BTreeMap<DocId, Vec<DocId>> = BTreeMap::new();
        for id in live {
            adj.entry(id.clone()).or_default();
        }
        for (from, to) in &self.edges {
            if live.contains(from) && live.contains(to) {
                adj.entry(from.clone()).or_default().push(to.clone());
            }
        }
        adj
    }
}
