use std::collections::BTreeMap;

use stixql_core::DocId;

struct TarjanState<'a> {
    adj: &'a BTreeMap<DocId, Vec<DocId>>,
    index: BTreeMap<DocId, usize>,
    lowlink: BTreeMap<DocId, usize>,
    on_stack: BTreeMap<DocId, bool>,
    stack: Vec<DocId>,
    next_index: usize,
    components: Vec<Vec<DocId>>,
}

/// Tarjan's strongly-connected-components over a dependency adjacency.
/// Deterministic: roots are visited in `BTreeMap` key order, so component
/// output is stable for a given graph.
pub fn strongly_connected_components(
    adj: &BTreeMap<DocId, Vec<DocId>>,
) -> Vec<Vec<DocId>> {
    let mut state = TarjanState {
        adj,
        index: BTreeMap::new(),
        lowlink: BTreeMap::new(),
        on_stack: BTreeMap::new(),
        stack: Vec::new(),
        next_index: 0,
        components: Vec::new(),
    };
    for id in adj.keys() {
        if !state.index.contains_key(id) {
            visit(id.clone(), &mut state);
        }
    }
    state.components
}

fn visit(node: DocId, state: &mut TarjanState<'_>) {
    state.index.insert(node.clone(), state.next_index);
    state.lowlink.insert(node.clone(), state.next_index);
    state.next_index += 1;
    state.stack.push(node.clone());
    state.on_stack.insert(node.clone(), true);

    let neighbors = state.adj.get(&node).cloned().unwrap_or_default();
    for next in neighbors {
        if !state.index.contains_key(&next) {
            visit(next.clone(), state);
            let next_low = state.lowlink.get(&next).copied().unwrap_or(usize::MAX);
            if let Some(low) = state.lowlink.get_mut(&node) {
                *low = (*low).min(next_low);
            }
        } else if state.on_stack.get(&next).copied().unwrap_or(false) {
            let next_idx = state.index.get(&next).copied().unwrap_or(usize::MAX);
            if let Some(low) = state.lowlink.get_mut(&node) {
                *low = (*low).min(next_idx);
            }
        }
    }

    if state.lowlink.get(&node) == state.index.get(&node) {
        let mut component = Vec::new();
        while let Some(member) = state.stack.pop() {
            state.on_stack.insert(member.clone(), false);
            let done = member == node;
            component.push(member);
            if done {
                break;
            }
        }
        state.components.push(component);
    }
}
