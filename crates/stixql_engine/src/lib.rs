//! Batch orchestration over the document/graph mapping pipeline.
//!
//! The [`Engine`] ties the layers together: encode every submitted document,
//! build the batch dependency graph, resolve or fail missing references,
//! contract cycles for two-phase insertion, execute one transaction per
//! ordered instruction, and report a per-document [`Outcome`]. Deletion runs
//! the same pipeline with reversed ordering; `fetch` reads a stored object
//! graph back into a document.

mod engine;
mod error;
mod instruction;
mod options;
mod report;
mod resolver;

pub use engine::Engine;
pub use error::EngineError;
pub use instruction::{Instruction, Status};
pub use options::EngineConfig;
pub use report::{BatchReport, Outcome, OutcomeStatus};
pub use resolver::{ReferenceResolver, StaticResolver};
