use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use stixql_core::DocId;

use crate::error::DagError;
use crate::graph::DepGraph;
use crate::scc::strongly_connected_components;

/// One schedulable unit: a single document, or a contracted cycle whose
/// members must be inserted with a phase split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Members in batch-submission order.
    pub members: Vec<DocId>,
    pub cyclic: bool,
}

/// Execution order over a batch: components in dependency order
/// (dependencies before dependents), ties broken by submission order.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub components: Vec<Component>,
}

impl Schedule {
    /// Flattened document order, cycle members inline.
    pub fn flat_order(&self) -> Vec<DocId> {
        self.components
            .iter()
            .flat_map(|c| c.members.iter().cloned())
            .collect()
    }
}

/// Contract strongly-connected components and order the condensation with
/// Kahn's algorithm. `live` is the set of nodes still eligible for execution
/// (batch members that have not already failed); edges leaving the live set
/// are treated as satisfied.
pub fn schedule(graph: &DepGraph, live: &BTreeSet<DocId>) -> Result<Schedule, DagError> {
    let adj = graph.adjacency_within(live);
    let sccs = strongly_connected_components(&adj);

    let mut comp_of: BTreeMap<DocId, usize> = BTreeMap::new();
    for (idx, members) in sccs.iter().enumerate() {
        for id in members {
            comp_of.insert(id.clone(), idx);
        }
    }

    let submission = |id: &DocId| graph.node(id).map(|m| m.order).unwrap_or(usize::MAX);

    // Component metadata: cyclic flag and ordered members.
    let mut components: Vec<Component> = Vec::with_capacity(sccs.len());
    for members in &sccs {
        let self_loop = members.len() == 1 && {
            let id = &members[0];
            adj.get(id).map(|n| n.contains(id)).unwrap_or(false)
        };
        let mut ordered = members.clone();
        ordered.sort_by_key(|id| (submission(id), id.clone()));
        components.push(Component {
            members: ordered,
            cyclic: members.len() > 1 || self_loop,
        });
    }

    // Condensation edges + in-degrees.
    let mut comp_adj: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); sccs.len()];
    let mut indegree: Vec<usize> = vec![0; sccs.len()];
    for (from, tos) in &adj {
        let cf = comp_of[from];
        for to in tos {
            let ct = comp_of[to];
            if cf != ct && comp_adj[cf].insert(ct) {
                indegree[ct] += 1;
            }
        }
    }

    // Kahn over the condensation. The heap key is the minimum submission
    // index in the component, so ready ties resolve in batch order.
    let comp_key = |idx: usize| -> (usize, DocId) {
        // Members are non-empty and sorted by submission index.
        let members = &components[idx].members;
        let min_order = members.iter().map(&submission).min().unwrap_or(usize::MAX);
        (min_order, members[0].clone())
    };

    let mut ready: BinaryHeap<Reverse<((usize, DocId), usize)>> = BinaryHeap::new();
    for idx in 0..components.len() {
        if indegree[idx] == 0 {
            ready.push(Reverse((comp_key(idx), idx)));
        }
    }

    let mut ordered: Vec<Component> = Vec::with_capacity(components.len());
    let mut emitted = vec![false; components.len()];
    while let Some(Reverse((_, idx))) = ready.pop() {
        emitted[idx] = true;
        ordered.push(components[idx].clone());
        for &next in &comp_adj[idx] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(Reverse((comp_key(next), next)));
            }
        }
    }

    if ordered.len() != components.len() {
        // SCC contraction guarantees an acyclic condensation.
        return Err(DagError::Inconsistent(
            "condensation was not acyclic".to_string(),
        ));
    }

    Ok(Schedule {
        components: ordered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DepGraph;

    fn id(n: u8) -> DocId {
        DocId::parse(&format!(
            "identity--{n:08x}-0000-4000-8000-000000000000"
        ))
        .unwrap()
    }

    fn live(ns: &[u8]) -> BTreeSet<DocId> {
        ns.iter().map(|&n| id(n)).collect()
    }

    #[test]
    fn dependencies_precede_dependents() {
        let mut g = DepGraph::new();
        g.ensure_batch_node(id(1), 0);
        g.ensure_batch_node(id(2), 1);
        g.ensure_batch_node(id(3), 2);
        // 3 depends on nothing; 2 depends on 3; 1 depends on 2.
        g.add_dependency(id(3), id(2));
        g.add_dependency(id(2), id(1));

        let schedule = schedule(&g, &live(&[1, 2, 3])).unwrap();
        let order = schedule.flat_order();
        assert_eq!(order, vec![id(3), id(2), id(1)]);
        for (from, to) in g.edges() {
            let pf = order.iter().position(|x| x == from).unwrap();
            let pt = order.iter().position(|x| x == to).unwrap();
            assert!(pf < pt, "dependency must precede dependent");
        }
    }

    #[test]
    fn independent_nodes_keep_submission_order() {
        let mut g = DepGraph::new();
        g.ensure_batch_node(id(9), 0);
        g.ensure_batch_node(id(1), 1);
        g.ensure_batch_node(id(5), 2);
        let s = schedule(&g, &live(&[9, 1, 5])).unwrap();
        assert_eq!(s.flat_order(), vec![id(9), id(1), id(5)]);
    }

    #[test]
    fn mutual_cycle_contracts_to_one_component() {
        let mut g = DepGraph::new();
        g.ensure_batch_node(id(1), 0);
        g.ensure_batch_node(id(2), 1);
        g.add_dependency(id(1), id(2));
        g.add_dependency(id(2), id(1));
        let s = schedule(&g, &live(&[1, 2])).unwrap();
        assert_eq!(s.components.len(), 1);
        assert!(s.components[0].cyclic);
        assert_eq!(s.components[0].members, vec![id(1), id(2)]);
    }

    #[test]
    fn self_loop_is_cyclic_component() {
        let mut g = DepGraph::new();
        g.ensure_batch_node(id(1), 0);
        g.add_dependency(id(1), id(1));
        let s = schedule(&g, &live(&[1])).unwrap();
        assert_eq!(s.components.len(), 1);
        assert!(s.components[0].cyclic);
    }

    #[test]
    fn edges_leaving_live_set_are_ignored() {
        let mut g = DepGraph::new();
        g.ensure_batch_node(id(1), 0);
        g.ensure_ref_node(id(7)); // already stored externally
        g.add_dependency(id(7), id(1));
        let s = schedule(&g, &live(&[1])).unwrap();
        assert_eq!(s.flat_order(), vec![id(1)]);
    }
}
