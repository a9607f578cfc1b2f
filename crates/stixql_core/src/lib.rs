//! Document model shared by the stixql crates.
//!
//! A [`Document`] is one self-describing threat-intelligence record: a type
//! tag, a globally unique [`DocId`], and a flat property map whose non-scalar
//! members are interpreted by the schema registry. The query-result tree
//! ([`ResultNode`]) is the typed form in which a graph store hands results
//! back to the decoder.

mod document;
mod error;
mod id;
mod literal;
mod result;

pub use document::Document;
pub use error::DocumentError;
pub use id::DocId;
pub use literal::render_literal;
pub use result::{AttributeNode, EntityNode, RelationNode, ResultNode, RolePlayers};
