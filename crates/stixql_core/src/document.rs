use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DocumentError;
use crate::id::DocId;

/// One threat-intelligence record. Properties other than `type` and `id`
/// live in the map; interpretation (scalar vs sub-structure) is deferred to
/// the schema registry. BTreeMap keeps iteration deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "type")]
    pub ty: String,
    pub id: DocId,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

impl Document {
    /// Construct from a parsed JSON value. Absent `type`/`id` or a malformed
    /// id fail fast, before any scheduling.
    pub fn from_json(value: Value) -> Result<Self, DocumentError> {
        let obj = match value {
            Value::Object(map) => map,
            _ => return Err(DocumentError::NotAnObject),
        };
        let ty = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DocumentError::MissingField("type"))?
            .to_string();
        let id_str = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or(DocumentError::MissingField("id"))?;
        let id = DocId::parse(id_str)?;
        if id.type_part() != ty {
            return Err(DocumentError::TypeMismatch {
                ty,
                id: id_str.to_string(),
            });
        }
        let properties = obj
            .into_iter()
            .filter(|(k, _)| k != "type" && k != "id")
            .collect();
        Ok(Document { ty, id, properties })
    }

    /// Parse a JSON source string (convenience over [`Document::from_json`]).
    pub fn from_json_str(src: &str) -> Result<Self, DocumentError> {
        let value: Value =
            serde_json::from_str(src).map_err(|_| DocumentError::NotAnObject)?;
        Self::from_json(value)
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Render back to a full JSON object including `type` and `id`.
    pub fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("type".to_string(), Value::String(self.ty.clone()));
        obj.insert("id".to_string(), Value::String(self.id.to_string()));
        for (k, v) in &self.properties {
            obj.insert(k.clone(), v.clone());
        }
        Value::Object(obj)
    }
}
