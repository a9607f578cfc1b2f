use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("no schema mapping for document type `{0}`")]
    UnknownType(String),

    #[error("no structural rule for sub-structure `{sub}` on type `{ty}`")]
    UnknownRule { ty: String, sub: String },

    #[error("invalid schema config: {0}")]
    Invalid(String),
}
