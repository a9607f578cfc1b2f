use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::registry::SchemaRegistry;
use crate::rule::TypeMapping;

/// Declarative registry configuration, usually loaded from a JSON file.
/// Validation happens in [`SchemaRegistry::from_config`], not on parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub types: BTreeMap<String, TypeMapping>,
    /// Hash-algorithm name → graph entity type ("SHA-256" → "sha-256").
    #[serde(default)]
    pub hash_entities: BTreeMap<String, String>,
    /// Standard-relation type → document type ("uses" → "relationship").
    #[serde(default)]
    pub standard_relations: BTreeMap<String, String>,
}

impl SchemaConfig {
    pub fn from_json_str(src: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(src).map_err(|e| SchemaError::Invalid(format!("config parse: {e}")))
    }

    pub fn into_registry(self) -> Result<SchemaRegistry, SchemaError> {
        SchemaRegistry::from_config(self)
    }
}
