use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    /// No schema mapping exists for the document's declared type. Fatal for
    /// that document, reported immediately, never retried.
    #[error("unsupported document type `{0}`")]
    UnsupportedType(String),

    /// A relation/attribute/sub-structure name with no structural rule.
    #[error("unknown shape `{name}` while {context}")]
    UnknownShape { name: String, context: String },

    /// Two writes to a non-list attribute during decode.
    #[error("duplicate value for non-list attribute `{0}`")]
    DuplicateScalar(String),

    /// A granular-marking selector that resolves to no scalar-pass variable
    /// (surfaced only under strict failure handling).
    #[error("marking selector `{0}` does not address an encoded property")]
    SelectorUnresolved(String),

    /// Property value shaped contrary to its schema spec.
    #[error("invalid property `{prop}`: {reason}")]
    InvalidProperty { prop: String, reason: String },
}
