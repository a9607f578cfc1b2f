//! Schema-directed compilation between documents and graph query text.
//!
//! The [`Encoder`] turns one document into a [`Fragment`] (match/insert
//! sections plus the set of foreign identities it references); the
//! [`Decoder`] reverses a typed query-result tree into a document; the
//! deletion planner mirrors the encoder with match/delete pairs ordered
//! innermost-first. All three resolve structure through the shared
//! [`stixql_schema::SchemaRegistry`] and dispatch on the closed
//! [`stixql_schema::StructuralCategory`] enum.

mod decoder;
mod delete;
mod encoder;
mod error;
mod fragment;
mod vars;

pub use decoder::Decoder;
pub use delete::{plan_delete, DeletePlan, DeleteStep};
pub use encoder::{Encoder, SanitizeProfile};
pub use error::CompileError;
pub use fragment::Fragment;
pub use vars::VarAllocator;
