//! Schema registry for the stixql mapping engine.
//!
//! The registry is static configuration: for every document type a property
//! map (property name to graph attribute name, empty means structural) plus a
//! table of structural rules naming the relation and roles each sub-structure
//! compiles into. It is built once, from a JSON config or the builder, and
//! shared immutably across encoder, decoder and scheduler. Derived reverse
//! indexes for decoding are computed at construction, never lazily.

mod config;
mod error;
mod registry;
mod rule;

pub use config::SchemaConfig;
pub use error::SchemaError;
pub use registry::{RegistryBuilder, SchemaRegistry};
pub use rule::{ObjectKind, PropertySpec, StructuralCategory, StructuralRule, TypeMapping};
