use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The closed set of shapes a non-scalar document property can take. Every
/// structural rule names exactly one; encoder and decoder dispatch on it with
/// an exhaustive `match`, so adding a variant forces both sides to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralCategory {
    /// One or more foreign identities bound into a relation with the owner.
    EmbeddedReference,
    /// The document itself is a relation instance (relationship/sighting).
    StandardRelation,
    /// Arbitrary string keys → scalar or list values, compiled to per-key
    /// sub-entities in one owning relation.
    KeyValue,
    /// Repeated structured sub-records, each compiled recursively, all bound
    /// into one relation with the owner.
    ListOfObjects,
    /// Extension name → nested record, one relation per entry.
    Extension,
    /// Hash-algorithm name → digest, one sub-entity per present algorithm.
    Hash,
    /// (marking id, field selectors) pairs referencing scalar-pass variables.
    GranularMarking,
}

/// How one sub-structure compiles: its category, the relation it binds into,
/// and the role pair used. `player` names the sub-entity type where the
/// category introduces one (key-value, list-of-objects, extension).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralRule {
    pub category: StructuralCategory,
    /// Relation type name. Empty on a `StandardRelation` rule means the
    /// relation type is dynamic, taken from the document's
    /// `relationship_type` property.
    #[serde(default)]
    pub relation: String,
    #[serde(default)]
    pub owner_role: String,
    #[serde(default)]
    pub pointed_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
    /// Key attribute type for `KeyValue` rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_attr: Option<String>,
    /// Value attribute type for `KeyValue` rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_attr: Option<String>,
}

/// How one scalar property maps onto a graph attribute. An empty `attr`
/// signals "structural: handled by a rule, not an attribute".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    #[serde(default)]
    pub attr: String,
    #[serde(default)]
    pub is_list: bool,
}

impl PropertySpec {
    pub fn scalar(attr: impl Into<String>) -> Self {
        PropertySpec {
            attr: attr.into(),
            is_list: false,
        }
    }

    pub fn scalar_list(attr: impl Into<String>) -> Self {
        PropertySpec {
            attr: attr.into(),
            is_list: true,
        }
    }

    pub fn structural() -> Self {
        PropertySpec {
            attr: String::new(),
            is_list: false,
        }
    }

    pub fn is_structural(&self) -> bool {
        self.attr.is_empty()
    }
}

/// Whether a document type compiles to an entity or to a relation instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Entity,
    Relation,
}

impl Default for ObjectKind {
    fn default() -> Self {
        ObjectKind::Entity
    }
}

/// Full mapping for one document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMapping {
    #[serde(default)]
    pub kind: ObjectKind,
    pub properties: BTreeMap<String, PropertySpec>,
    #[serde(default)]
    pub structurals: BTreeMap<String, StructuralRule>,
}

impl TypeMapping {
    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.get(name)
    }

    pub fn rule(&self, sub: &str) -> Option<&StructuralRule> {
        self.structurals.get(sub)
    }
}
