use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DocumentError;

/// Document identity of the form `<type>--<uuid>`. Stored as the full string,
/// validated on construction so downstream code can split it without
/// re-checking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId(String);

impl DocId {
    /// Parse and validate an identity string.
    pub fn parse(s: &str) -> Result<Self, DocumentError> {
        let (ty, tail) = s
            .split_once("--")
            .ok_or_else(|| DocumentError::InvalidId(s.to_string()))?;
        if ty.is_empty() || !ty.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-') {
            return Err(DocumentError::InvalidId(s.to_string()));
        }
        uuid::Uuid::parse_str(tail).map_err(|_| DocumentError::InvalidId(s.to_string()))?;
        Ok(DocId(s.to_string()))
    }

    /// The `<type>` prefix of the identity.
    pub fn type_part(&self) -> &str {
        // Validated in parse: the separator is always present.
        self.0.split_once("--").map(|(ty, _)| ty).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DocId {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DocId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DocId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
