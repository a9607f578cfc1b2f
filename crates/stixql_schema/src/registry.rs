use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::config::SchemaConfig;
use crate::error::SchemaError;
use crate::rule::{ObjectKind, PropertySpec, StructuralRule, TypeMapping};

/// Immutable schema registry. Construct once (builder or [`SchemaConfig`]),
/// share by reference or `Arc`; the engine never mutates it. The reverse
/// indexes consumed by the decoder are derived in [`RegistryBuilder::finish`]
/// so lookups during decode are plain map reads.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    types: BTreeMap<String, TypeMapping>,
    /// Hash-algorithm name → graph entity type, e.g. "SHA-256" → "sha-256".
    hash_entities: BTreeMap<String, String>,
    /// Standard-relation type → document type, e.g. "uses" → "relationship".
    relation_docs: BTreeMap<String, String>,

    // Derived at construction.
    hash_algorithms: BTreeMap<String, String>,
    /// (doc type, relation type) → sub-structure name.
    relation_index: BTreeMap<(String, String), String>,
    /// doc type → (attribute type → (property name, is_list)).
    attr_index: BTreeMap<String, BTreeMap<String, (String, bool)>>,
    config_hash: String,
}

impl SchemaRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Build from declarative config, validating cross-references.
    pub fn from_config(config: SchemaConfig) -> Result<Self, SchemaError> {
        let mut builder = RegistryBuilder::default();
        for (ty, mapping) in config.types {
            builder = builder.mapping(ty, mapping);
        }
        for (algo, entity) in config.hash_entities {
            builder = builder.hash_entity(algo, entity);
        }
        for (relation, doc_ty) in config.standard_relations {
            builder = builder.standard_relation(relation, doc_ty);
        }
        builder.finish()
    }

    /// Property map for a document type.
    pub fn mapping_for(&self, ty: &str) -> Result<&TypeMapping, SchemaError> {
        self.types
            .get(ty)
            .ok_or_else(|| SchemaError::UnknownType(ty.to_string()))
    }

    pub fn has_type(&self, ty: &str) -> bool {
        self.types.contains_key(ty)
    }

    /// Structural rule for one sub-structure of a document type.
    pub fn structural_rule_for(&self, ty: &str, sub: &str) -> Result<&StructuralRule, SchemaError> {
        self.mapping_for(ty)?
            .rule(sub)
            .ok_or_else(|| SchemaError::UnknownRule {
                ty: ty.to_string(),
                sub: sub.to_string(),
            })
    }

    /// Reverse lookup used while decoding an entity of `ty`: which
    /// sub-structure produced a relation of this type?
    pub fn rule_for_relation(&self, ty: &str, relation: &str) -> Option<(&str, &StructuralRule)> {
        let sub = self
            .relation_index
            .get(&(ty.to_string(), relation.to_string()))?;
        let rule = self.types.get(ty)?.rule(sub)?;
        Some((sub.as_str(), rule))
    }

    /// Reverse attribute lookup: graph attribute type → (property, is_list).
    pub fn attr_to_property(&self, ty: &str, attr: &str) -> Option<(&str, bool)> {
        self.attr_index
            .get(ty)?
            .get(attr)
            .map(|(p, l)| (p.as_str(), *l))
    }

    /// Document type a root-level relation decodes to (`"uses"` →
    /// `"relationship"`, `"sighting"` → `"sighting"`).
    pub fn doc_type_for_relation(&self, relation: &str) -> Option<&str> {
        self.relation_docs.get(relation).map(String::as_str)
    }

    pub fn hash_entity(&self, algorithm: &str) -> Option<&str> {
        self.hash_entities.get(algorithm).map(String::as_str)
    }

    pub fn hash_algorithm(&self, entity: &str) -> Option<&str> {
        self.hash_algorithms.get(entity).map(String::as_str)
    }

    /// Stable hash of the active configuration. Callers that cache registries
    /// across batches key the cache on this.
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }
}

/// Builder for programmatic registries (tests, embedders). `finish` validates
/// the configuration and computes the derived indexes.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    types: BTreeMap<String, TypeMapping>,
    hash_entities: BTreeMap<String, String>,
    relation_docs: BTreeMap<String, String>,
}

impl RegistryBuilder {
    pub fn mapping(mut self, ty: impl Into<String>, mapping: TypeMapping) -> Self {
        self.types.insert(ty.into(), mapping);
        self
    }

    pub fn hash_entity(mut self, algorithm: impl Into<String>, entity: impl Into<String>) -> Self {
        self.hash_entities.insert(algorithm.into(), entity.into());
        self
    }

    pub fn standard_relation(
        mut self,
        relation: impl Into<String>,
        doc_ty: impl Into<String>,
    ) -> Self {
        self.relation_docs.insert(relation.into(), doc_ty.into());
        self
    }

    pub fn finish(self) -> Result<SchemaRegistry, SchemaError> {
        validate(&self.types)?;

        let mut relation_index = BTreeMap::new();
        let mut attr_index: BTreeMap<String, BTreeMap<String, (String, bool)>> = BTreeMap::new();
        for (ty, mapping) in &self.types {
            let attrs = attr_index.entry(ty.clone()).or_default();
            for (prop, spec) in &mapping.properties {
                if !spec.is_structural() {
                    attrs.insert(spec.attr.clone(), (prop.clone(), spec.is_list));
                }
            }
            for (sub, rule) in &mapping.structurals {
                if !rule.relation.is_empty() {
                    relation_index.insert((ty.clone(), rule.relation.clone()), sub.clone());
                }
            }
        }

        let hash_algorithms = self
            .hash_entities
            .iter()
            .map(|(algo, entity)| (entity.clone(), algo.clone()))
            .collect();

        let config_hash = {
            let canonical = serde_json::json!({
                "types": &self.types,
                "hash_entities": &self.hash_entities,
                "standard_relations": &self.relation_docs,
            });
            let bytes = serde_json::to_vec(&canonical)
                .map_err(|e| SchemaError::Invalid(format!("config hash encode: {e}")))?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            format!("{:x}", hasher.finalize())
        };

        Ok(SchemaRegistry {
            types: self.types,
            hash_entities: self.hash_entities,
            relation_docs: self.relation_docs,
            hash_algorithms,
            relation_index,
            attr_index,
            config_hash,
        })
    }
}

/// Structural properties must be rule-backed and vice versa; key-value rules
/// must name their key/value attributes; relation-kind types need at least
/// one standard-relation rule.
fn validate(types: &BTreeMap<String, TypeMapping>) -> Result<(), SchemaError> {
    use crate::rule::StructuralCategory::*;

    for (ty, mapping) in types {
        for (prop, spec) in &mapping.properties {
            if spec.is_structural() && !mapping.structurals.contains_key(prop) {
                return Err(SchemaError::Invalid(format!(
                    "type `{ty}`: property `{prop}` is structural but has no rule"
                )));
            }
        }
        for (sub, rule) in &mapping.structurals {
            match mapping.properties.get(sub) {
                // Extension entries are keyed by extension name, which is not
                // itself a property; only the `extensions` container is.
                None if rule.category == Extension => {}
                None => {
                    return Err(SchemaError::Invalid(format!(
                        "type `{ty}`: rule `{sub}` has no matching property"
                    )))
                }
                Some(spec) if !spec.is_structural() => {
                    return Err(SchemaError::Invalid(format!(
                        "type `{ty}`: rule `{sub}` shadows a scalar property"
                    )))
                }
                Some(_) => {}
            }
            if rule.category == KeyValue && (rule.key_attr.is_none() || rule.value_attr.is_none())
            {
                return Err(SchemaError::Invalid(format!(
                    "type `{ty}`: key-value rule `{sub}` missing key_attr/value_attr"
                )));
            }
            // An Extension rule with an empty relation is the container
            // property; only per-name entry rules introduce a player.
            let needs_player = match rule.category {
                KeyValue | ListOfObjects => true,
                Extension => !rule.relation.is_empty(),
                _ => false,
            };
            if needs_player && rule.player.is_none() {
                return Err(SchemaError::Invalid(format!(
                    "type `{ty}`: rule `{sub}` ({:?}) missing player entity",
                    rule.category
                )));
            }
        }
        if mapping.kind == ObjectKind::Relation
            && !mapping
                .structurals
                .values()
                .any(|r| r.category == StandardRelation)
        {
            return Err(SchemaError::Invalid(format!(
                "type `{ty}` is relation-kind but declares no standard-relation rule"
            )));
        }
    }
    Ok(())
}
