use thiserror::Error;

/// Fail-fast errors raised while constructing a [`crate::Document`]. These are
/// programmer errors: they abort before any scheduling happens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document id is not of the form <type>--<uuid>: {0}")]
    InvalidId(String),

    #[error("document is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("document `type` does not match id prefix: type={ty}, id={id}")]
    TypeMismatch { ty: String, id: String },

    #[error("document is not a JSON object")]
    NotAnObject,
}
