//! Batch-local dependency graph for the stixql scheduler.
//!
//! Nodes are document identities: every encoded document plus every foreign
//! identity its fragment references. Edges point dependency to dependent, so a
//! topological order inserts dependencies first. The graph is built once per
//! batch, consumed by [`schedule`], and dropped with the batch.

mod error;
mod graph;
mod order;
mod scc;

pub use error::DagError;
pub use graph::{DepGraph, NodeMeta};
pub use order::{schedule, Component, Schedule};
pub use scc::strongly_connected_components;
