use std::collections::BTreeMap;

use serde_json::Value;

use stixql_core::{DocId, Document, EntityNode, RelationNode, ResultNode};
use stixql_schema::{SchemaRegistry, StructuralCategory, TypeMapping};

use crate::error::CompileError;

/// Reconstructs documents from typed query-result trees. Mirrors the encoder:
/// relations are classified by name through the registry's reverse indexes
/// and dispatched on the closed structural-category enum; names that classify
/// to nothing fail with [`CompileError::UnknownShape`] rather than being
/// silently dropped.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> Decoder<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Decoder { registry }
    }

    pub fn decode(&self, node: &ResultNode) -> Result<Document, CompileError> {
        match node {
            ResultNode::Entity(entity) => self.decode_entity_doc(entity),
            ResultNode::Relation(relation) => self.decode_relation_doc(relation),
            ResultNode::Attribute(attr) => Err(CompileError::UnknownShape {
                name: attr.ty.clone(),
                context: "decoding a document root".to_string(),
            }),
        }
    }

    fn decode_entity_doc(&self, entity: &EntityNode) -> Result<Document, CompileError> {
        let mapping = self
            .registry
            .mapping_for(&entity.ty)
            .map_err(|_| CompileError::UnsupportedType(entity.ty.clone()))?;

        let mut props = BTreeMap::new();
        let mut id = None;
        self.decode_attrs(&entity.ty, &entity.attrs, &mut props, &mut id)?;
        for relation in &entity.relations {
            self.decode_owned_relation(&entity.ty, mapping, relation, &mut props)?;
        }

        let id = id.ok_or_else(|| CompileError::InvalidProperty {
            prop: "id".to_string(),
            reason: "query result carries no stix-id".to_string(),
        })?;
        Ok(Document {
            ty: entity.ty.clone(),
            id,
            properties: props,
        })
    }

    /// Relationship/sighting documents come back as relation roots: named
    /// roles recover the `*_ref` properties, attributes decode as usual.
    fn decode_relation_doc(&self, relation: &RelationNode) -> Result<Document, CompileError> {
        let doc_ty = self
            .registry
            .doc_type_for_relation(&relation.ty)
            .ok_or_else(|| CompileError::UnknownShape {
                name: relation.ty.clone(),
                context: "classifying a root relation".to_string(),
            })?
            .to_string();
        let mapping = self
            .registry
            .mapping_for(&doc_ty)
            .map_err(|_| CompileError::UnsupportedType(doc_ty.clone()))?;

        let mut props = BTreeMap::new();
        let mut id = None;
        self.decode_attrs(&doc_ty, &relation.attrs, &mut props, &mut id)?;

        // Dynamic relation names carry the relationship_type value.
        if mapping.property("relationship_type").is_some()
            && !props.contains_key("relationship_type")
        {
            props.insert(
                "relationship_type".to_string(),
                Value::String(relation.ty.clone()),
            );
        }

        for role_players in &relation.roles {
            let (sub, _) = mapping
                .structurals
                .iter()
                .find(|(_, rule)| {
                    rule.category == StructuralCategory::StandardRelation
                        && rule.pointed_role == role_players.role
                })
                .ok_or_else(|| CompileError::UnknownShape {
                    name: role_players.role.clone(),
                    context: format!("decoding roles of `{}`", relation.ty),
                })?;
            let is_list = mapping.property(sub).map(|s| s.is_list).unwrap_or(false);
            for player in &role_players.players {
                let pid = player_stix_id(player, &relation.ty)?;
                insert_scalar(&mut props, sub, is_list, Value::String(pid))?;
            }
        }

        for nested in &relation.relations {
            self.decode_owned_relation(&doc_ty, mapping, nested, &mut props)?;
        }

        let id = id.ok_or_else(|| CompileError::InvalidProperty {
            prop: "id".to_string(),
            reason: "query result carries no stix-id".to_string(),
        })?;
        Ok(Document {
            ty: doc_ty,
            id,
            properties: props,
        })
    }

    fn decode_attrs(
        &self,
        ty: &str,
        attrs: &[stixql_core::AttributeNode],
        props: &mut BTreeMap<String, Value>,
        id: &mut Option<DocId>,
    ) -> Result<(), CompileError> {
        for attr in attrs {
            if attr.ty == "stix-id" {
                let raw = attr.value.as_str().ok_or_else(|| CompileError::InvalidProperty {
                    prop: "id".to_string(),
                    reason: "stix-id is not a string".to_string(),
                })?;
                *id = Some(DocId::parse(raw).map_err(|e| CompileError::InvalidProperty {
                    prop: "id".to_string(),
                    reason: e.to_string(),
                })?);
                continue;
            }
            let (prop, is_list) = self
                .registry
                .attr_to_property(ty, &attr.ty)
                .ok_or_else(|| CompileError::UnknownShape {
                    name: attr.ty.clone(),
                    context: format!("decoding attributes of `{ty}`"),
                })?;
            insert_scalar(props, prop, is_list, attr.value.clone())?;
        }
        Ok(())
    }

    /// Classify one owned relation by name and rebuild the sub-structure it
    /// encodes. The dispatch is the mirror image of the encoder's.
    fn decode_owned_relation(
        &self,
        owner_ty: &str,
        mapping: &TypeMapping,
        relation: &RelationNode,
        props: &mut BTreeMap<String, Value>,
    ) -> Result<(), CompileError> {
        let (sub, rule) = self
            .registry
            .rule_for_relation(owner_ty, &relation.ty)
            .ok_or_else(|| CompileError::UnknownShape {
                name: relation.ty.clone(),
                context: format!("decoding relations of `{owner_ty}`"),
            })?;
        let sub = sub.to_string();
        let rule = rule.clone();

        match rule.category {
            StructuralCategory::EmbeddedReference => {
                let is_list = mapping.property(&sub).map(|s| s.is_list).unwrap_or(false);
                for player in relation.players_of(&rule.pointed_role) {
                    let pid = player_stix_id(player, &relation.ty)?;
                    insert_scalar(props, &sub, is_list, Value::String(pid))?;
                }
                Ok(())
            }
            StructuralCategory::KeyValue => {
                let key_attr = rule.key_attr.as_deref().unwrap_or("key");
                let value_attr = rule.value_attr.as_deref().unwrap_or("value");
                let mut obj = take_object(props, &sub);
                for player in relation.players_of(&rule.pointed_role) {
                    let entity = player_entity(player, &relation.ty)?;
                    let key = entity
                        .attr(key_attr)
                        .and_then(Value::as_str)
                        .ok_or_else(|| CompileError::UnknownShape {
                            name: relation.ty.clone(),
                            context: "key-value player without key attribute".to_string(),
                        })?
                        .to_string();
                    let values: Vec<Value> = entity
                        .attrs
                        .iter()
                        .filter(|a| a.ty == value_attr)
                        .map(|a| a.value.clone())
                        .collect();
                    let value = match values.len() {
                        1 => values.into_iter().next().unwrap_or(Value::Null),
                        _ => Value::Array(values),
                    };
                    obj.insert(key, value);
                }
                props.insert(sub, Value::Object(obj));
                Ok(())
            }
            StructuralCategory::ListOfObjects => {
                let mut items = Vec::new();
                for player in relation.players_of(&rule.pointed_role) {
                    let entity = player_entity(player, &relation.ty)?;
                    items.push(self.decode_subobject(entity)?);
                }
                props.insert(sub, Value::Array(items));
                Ok(())
            }
            StructuralCategory::Extension => {
                // `sub` is the extension name; the container property is the
                // owner's Extension rule with an empty relation name.
                let container = mapping
                    .structurals
                    .iter()
                    .find(|(_, r)| {
                        r.category == StructuralCategory::Extension && r.relation.is_empty()
                    })
                    .map(|(name, _)| name.clone())
                    .unwrap_or_else(|| "extensions".to_string());
                let mut obj = take_object(props, &container);
                for player in relation.players_of(&rule.pointed_role) {
                    let entity = player_entity(player, &relation.ty)?;
                    obj.insert(sub.clone(), self.decode_subobject(entity)?);
                }
                props.insert(container, Value::Object(obj));
                Ok(())
            }
            StructuralCategory::Hash => {
                let mut obj = take_object(props, &sub);
                for player in relation.players_of(&rule.pointed_role) {
                    let entity = player_entity(player, &relation.ty)?;
                    let algo = self.registry.hash_algorithm(&entity.ty).ok_or_else(|| {
                        CompileError::UnknownShape {
                            name: entity.ty.clone(),
                            context: "decoding hashes".to_string(),
                        }
                    })?;
                    let digest = entity.attr("hash-value").cloned().unwrap_or(Value::Null);
                    obj.insert(algo.to_string(), digest);
                }
                props.insert(sub, Value::Object(obj));
                Ok(())
            }
            StructuralCategory::GranularMarking => {
                let marking = relation
                    .players_of(&rule.owner_role)
                    .first()
                    .ok_or_else(|| CompileError::UnknownShape {
                        name: relation.ty.clone(),
                        context: "granular marking without a marking player".to_string(),
                    })?
                    .clone();
                let marking_id = player_stix_id(&marking, &relation.ty)?;
                let mut selectors = Vec::new();
                for player in relation.players_of(&rule.pointed_role) {
                    let attr = match player {
                        ResultNode::Attribute(attr) => attr,
                        _ => {
                            return Err(CompileError::UnknownShape {
                                name: relation.ty.clone(),
                                context: "marked player is not an attribute".to_string(),
                            })
                        }
                    };
                    selectors.push(self.selector_for(owner_ty, &attr.ty, &attr.value, props)?);
                }
                let entry = serde_json::json!({
                    "marking_ref": marking_id,
                    "selectors": selectors,
                });
                match props
                    .entry(sub)
                    .or_insert_with(|| Value::Array(Vec::new()))
                {
                    Value::Array(items) => items.push(entry),
                    _ => {
                        return Err(CompileError::DuplicateScalar(
                            "granular_markings".to_string(),
                        ))
                    }
                }
                Ok(())
            }
            StructuralCategory::StandardRelation => Err(CompileError::UnknownShape {
                name: relation.ty.clone(),
                context: format!("entity `{owner_ty}` owns a standard relation"),
            }),
        }
    }

    /// Rebuild a nested sub-record: attributes via its own property map, then
    /// any further relations found on the player (the recursion that makes
    /// extension → list-of-objects → hash decode by construction).
    fn decode_subobject(&self, entity: &EntityNode) -> Result<Value, CompileError> {
        let mapping = self
            .registry
            .mapping_for(&entity.ty)
            .map_err(|_| CompileError::UnknownShape {
                name: entity.ty.clone(),
                context: "decoding a sub-object".to_string(),
            })?;
        let mut props = BTreeMap::new();
        let mut id = None;
        self.decode_attrs(&entity.ty, &entity.attrs, &mut props, &mut id)?;
        for relation in &entity.relations {
            self.decode_owned_relation(&entity.ty, mapping, relation, &mut props)?;
        }
        Ok(Value::Object(props.into_iter().collect()))
    }

    /// Map a marked attribute back to its selector. List-valued properties
    /// recover the index by value position within the already-decoded list.
    fn selector_for(
        &self,
        owner_ty: &str,
        attr_ty: &str,
        value: &Value,
        props: &BTreeMap<String, Value>,
    ) -> Result<String, CompileError> {
        let (prop, is_list) = self
            .registry
            .attr_to_property(owner_ty, attr_ty)
            .ok_or_else(|| CompileError::UnknownShape {
                name: attr_ty.to_string(),
                context: "resolving a marking selector".to_string(),
            })?;
        if !is_list {
            return Ok(prop.to_string());
        }
        let index = props
            .get(prop)
            .and_then(Value::as_array)
            .and_then(|items| items.iter().position(|v| v == value))
            .ok_or_else(|| CompileError::InvalidProperty {
                prop: prop.to_string(),
                reason: "marked list element not present in decoded list".to_string(),
            })?;
        Ok(format!("{prop}.[{index}]"))
    }
}

fn player_entity<'n>(
    player: &'n ResultNode,
    relation_ty: &str,
) -> Result<&'n EntityNode, CompileError> {
    match player {
        ResultNode::Entity(entity) => Ok(entity),
        _ => Err(CompileError::UnknownShape {
            name: relation_ty.to_string(),
            context: "expected an entity player".to_string(),
        }),
    }
}

fn player_stix_id(player: &ResultNode, relation_ty: &str) -> Result<String, CompileError> {
    player_entity(player, relation_ty)?
        .stix_id()
        .map(str::to_string)
        .ok_or_else(|| CompileError::UnknownShape {
            name: relation_ty.to_string(),
            context: "player entity carries no stix-id".to_string(),
        })
}

fn take_object(
    props: &mut BTreeMap<String, Value>,
    prop: &str,
) -> serde_json::Map<String, Value> {
    match props.remove(prop) {
        Some(Value::Object(obj)) => obj,
        _ => serde_json::Map::new(),
    }
}

/// List-marked attributes append in arrival order; a second write to a
/// non-list attribute is an error, never a silent overwrite.
fn insert_scalar(
    props: &mut BTreeMap<String, Value>,
    prop: &str,
    is_list: bool,
    value: Value,
) -> Result<(), CompileError> {
    if is_list {
        match props
            .entry(prop.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => items.push(value),
            _ => return Err(CompileError::DuplicateScalar(prop.to_string())),
        }
        return Ok(());
    }
    if props.contains_key(prop) {
        return Err(CompileError::DuplicateScalar(prop.to_string()));
    }
    props.insert(prop.to_string(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_non_list_write_is_an_error() {
        let mut props = BTreeMap::new();
        insert_scalar(&mut props, "name", false, Value::String("a".into())).unwrap();
        let err = insert_scalar(&mut props, "name", false, Value::String("b".into())).unwrap_err();
        assert_eq!(err, CompileError::DuplicateScalar("name".to_string()));
    }

    #[test]
    fn list_writes_append_in_order() {
        let mut props = BTreeMap::new();
        insert_scalar(&mut props, "labels", true, Value::String("a".into())).unwrap();
        insert_scalar(&mut props, "labels", true, Value::String("b".into())).unwrap();
        assert_eq!(props["labels"], serde_json::json!(["a", "b"]));
    }
}
