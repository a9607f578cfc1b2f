use std::collections::BTreeSet;

use serde_json::Value;

use stixql_core::{render_literal, DocId, Document};
use stixql_schema::{ObjectKind, SchemaRegistry, StructuralCategory, StructuralRule, TypeMapping};

use crate::error::CompileError;
use crate::vars::VarAllocator;

/// One match/delete pair. Steps of a plan execute in order inside the
/// document's transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStep {
    pub match_ql: String,
    pub delete_ql: String,
}

impl DeleteStep {
    pub fn query(&self) -> String {
        format!("match {} delete {}", self.match_ql, self.delete_ql)
    }
}

/// Ordered deletion plan for one document: sub-objects and owned relations
/// first, the owning entity's own attributes and `isa` last. `dep_list`
/// carries the foreign identities the document references, so the scheduler
/// can delete dependents before their dependencies.
#[derive(Debug, Clone, Default)]
pub struct DeletePlan {
    pub steps: Vec<DeleteStep>,
    pub dep_list: BTreeSet<DocId>,
}

/// Mirror of the encoder with inverse order. Reference-shaped relations
/// (embedded, marking) delete the relation only, never the pointed player;
/// owned sub-entities (key-value, list, extension, hash) are deleted with
/// their relation, innermost first.
pub fn plan_delete(doc: &Document, registry: &SchemaRegistry) -> Result<DeletePlan, CompileError> {
    let mapping = registry
        .mapping_for(&doc.ty)
        .map_err(|_| CompileError::UnsupportedType(doc.ty.clone()))?;

    let mut vars = VarAllocator::new();
    let self_var = vars.fresh(&doc.ty);

    // For relation-shaped documents the graph type is the relation name, not
    // the document type.
    let graph_ty = match mapping.kind {
        ObjectKind::Entity => doc.ty.clone(),
        ObjectKind::Relation => relation_graph_type(doc, mapping.structurals.values())?,
    };
    let id_lit = render_literal(&Value::String(doc.id.to_string()));
    let core = format!("{self_var} isa {graph_ty}, has stix-id {id_lit}; ");

    let mut plan = DeletePlan::default();

    for (prop, value) in &doc.properties {
        let Some(spec) = mapping.property(prop) else {
            continue;
        };
        if !spec.is_structural() {
            continue;
        }
        let rule = registry
            .structural_rule_for(&doc.ty, prop)
            .map_err(|_| CompileError::UnknownShape {
                name: prop.clone(),
                context: format!("planning deletion of `{}`", doc.ty),
            })?;
        delete_structural(
            registry, &mut vars, &mut plan, &core, &self_var, &doc.ty, prop, rule, value,
        )?;
    }

    // Core step(s), last: each attribute value goes only if no other living
    // owner still holds it, then the entity's own isa.
    for (prop, value) in &doc.properties {
        let Some(spec) = mapping.property(prop) else {
            continue;
        };
        if spec.is_structural() || value.is_null() {
            continue;
        }
        let count = match value {
            Value::Array(items) => items.len(),
            _ => 1,
        };
        for _ in 0..count {
            let v = vars.fresh(&spec.attr);
            plan.steps.push(DeleteStep {
                match_ql: format!(
                    "{core}{self_var} has {attr} {v}; \
                     not {{ $other has {attr} {v}; not {{ $other is {self_var}; }}; }}; ",
                    attr = spec.attr
                ),
                delete_ql: format!("{v} isa {}; ", spec.attr),
            });
        }
    }
    let idv = vars.fresh("stix-id");
    plan.steps.push(DeleteStep {
        match_ql: format!("{core}{self_var} has stix-id {idv}; "),
        delete_ql: format!("{idv} isa stix-id; "),
    });
    plan.steps.push(DeleteStep {
        match_ql: core,
        delete_ql: format!("{self_var} isa {graph_ty}; "),
    });

    Ok(plan)
}

fn relation_graph_type<'r>(
    doc: &Document,
    rules: impl Iterator<Item = &'r StructuralRule>,
) -> Result<String, CompileError> {
    for rule in rules {
        if rule.category == StructuralCategory::StandardRelation && !rule.relation.is_empty() {
            return Ok(rule.relation.clone());
        }
    }
    doc.property("relationship_type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CompileError::InvalidProperty {
            prop: "relationship_type".to_string(),
            reason: "relation type could not be determined".to_string(),
        })
}

#[allow(clippy::too_many_arguments)]
fn delete_structural(
    registry: &SchemaRegistry,
    vars: &mut VarAllocator,
    plan: &mut DeletePlan,
    match_prefix: &str,
    owner_var: &str,
    owner_ty: &str,
    prop: &str,
    rule: &StructuralRule,
    value: &Value,
) -> Result<(), CompileError> {
    match rule.category {
        StructuralCategory::EmbeddedReference => {
            // Reference relation: delete the binding, keep the player alive.
            let rel = vars.fresh(&rule.relation);
            plan.steps.push(DeleteStep {
                match_ql: format!(
                    "{match_prefix}{rel} ({}: {owner_var}) isa {}; ",
                    rule.owner_role, rule.relation
                ),
                delete_ql: format!("{rel} isa {}; ", rule.relation),
            });
            collect_ref_ids(prop, value, &mut plan.dep_list)?;
            Ok(())
        }
        StructuralCategory::GranularMarking => {
            // The owner plays no role here; the relation binds the marking
            // definition to the owner's attribute values. Match it through
            // the marking player and pin it with one marked attribute.
            let entries = value.as_array().ok_or_else(|| CompileError::InvalidProperty {
                prop: prop.to_string(),
                reason: "granular markings must be a list".to_string(),
            })?;
            let mapping = registry.mapping_for(owner_ty).ok();
            for entry in entries {
                let Some(raw) = entry.get("marking_ref").and_then(Value::as_str) else {
                    continue;
                };
                let marking_id =
                    DocId::parse(raw).map_err(|e| CompileError::InvalidProperty {
                        prop: prop.to_string(),
                        reason: e.to_string(),
                    })?;
                let mvar = vars.fresh(&rule.owner_role);
                let rel = vars.fresh(&rule.relation);
                let lit = render_literal(&Value::String(marking_id.to_string()));
                let mut match_ql = format!(
                    "{match_prefix}{mvar} isa {}, has stix-id {lit}; \
                     {rel} ({}: {mvar}) isa {}; ",
                    marking_id.type_part(),
                    rule.owner_role,
                    rule.relation
                );
                if let Some(attr) = mapping.and_then(|m| first_selector_attr(m, entry)) {
                    let v = vars.fresh(&attr);
                    match_ql.push_str(&format!(
                        "{owner_var} has {attr} {v}; {rel} ({}: {v}); ",
                        rule.pointed_role
                    ));
                }
                plan.dep_list.insert(marking_id);
                plan.steps.push(DeleteStep {
                    match_ql,
                    delete_ql: format!("{rel} isa {}; ", rule.relation),
                });
            }
            Ok(())
        }
        StructuralCategory::StandardRelation => {
            // The document is the relation; its isa goes in the core step.
            collect_ref_ids(prop, value, &mut plan.dep_list)?;
            Ok(())
        }
        StructuralCategory::KeyValue => {
            let player = rule.player.as_deref().unwrap_or("key-value");
            delete_owned_players(vars, plan, match_prefix, owner_var, rule, player);
            Ok(())
        }
        StructuralCategory::Hash => {
            let entries = value.as_object().ok_or_else(|| CompileError::InvalidProperty {
                prop: prop.to_string(),
                reason: "expected a JSON object".to_string(),
            })?;
            let rel = vars.fresh(&rule.relation);
            let rel_match = format!(
                "{match_prefix}{rel} ({}: {owner_var}) isa {}; ",
                rule.owner_role, rule.relation
            );
            for algo in entries.keys() {
                let entity = registry
                    .hash_entity(algo)
                    .ok_or_else(|| CompileError::UnknownShape {
                        name: algo.clone(),
                        context: "planning hash deletion".to_string(),
                    })?;
                let p = vars.fresh(entity);
                plan.steps.push(DeleteStep {
                    match_ql: format!(
                        "{rel_match}{rel} ({}: {p}); {p} isa {entity}; ",
                        rule.pointed_role
                    ),
                    delete_ql: format!("{p} isa {entity}; "),
                });
            }
            plan.steps.push(DeleteStep {
                match_ql: rel_match,
                delete_ql: format!("{rel} isa {}; ", rule.relation),
            });
            Ok(())
        }
        StructuralCategory::ListOfObjects => {
            let player = rule.player.as_deref().ok_or_else(|| CompileError::UnknownShape {
                name: prop.to_string(),
                context: "list-of-objects rule without player entity".to_string(),
            })?;
            let items = value.as_array().ok_or_else(|| CompileError::InvalidProperty {
                prop: prop.to_string(),
                reason: "expected an array".to_string(),
            })?;
            delete_nested_then_players(
                registry,
                vars,
                plan,
                match_prefix,
                owner_var,
                rule,
                player,
                items.iter(),
            )?;
            Ok(())
        }
        StructuralCategory::Extension => {
            if rule.relation.is_empty() {
                // Container: resolve each entry's own rule by extension name.
                let entries = value.as_object().ok_or_else(|| CompileError::InvalidProperty {
                    prop: prop.to_string(),
                    reason: "expected a JSON object".to_string(),
                })?;
                for (name, record) in entries {
                    let entry_rule = registry
                        .structural_rule_for(owner_ty, name)
                        .map_err(|_| CompileError::UnknownShape {
                            name: name.clone(),
                            context: format!("planning extension deletion of `{owner_ty}`"),
                        })?
                        .clone();
                    let player =
                        entry_rule
                            .player
                            .as_deref()
                            .ok_or_else(|| CompileError::UnknownShape {
                                name: name.clone(),
                                context: "extension rule without player entity".to_string(),
                            })?;
                    delete_nested_then_players(
                        registry,
                        vars,
                        plan,
                        match_prefix,
                        owner_var,
                        &entry_rule,
                        player,
                        std::iter::once(record),
                    )?;
                }
            }
            Ok(())
        }
    }
}

/// Delete nested sub-structures of each instance first, then the instances
/// and their owning relation.
#[allow(clippy::too_many_arguments)]
fn delete_nested_then_players<'v>(
    registry: &SchemaRegistry,
    vars: &mut VarAllocator,
    plan: &mut DeletePlan,
    match_prefix: &str,
    owner_var: &str,
    rule: &StructuralRule,
    player: &str,
    items: impl Iterator<Item = &'v Value>,
) -> Result<(), CompileError> {
    let rel = vars.fresh(&rule.relation);
    let rel_match = format!(
        "{match_prefix}{rel} ({}: {owner_var}) isa {}; ",
        rule.owner_role, rule.relation
    );

    let player_mapping = registry.mapping_for(player).ok();
    let mut player_vars = Vec::new();
    for item in items {
        let p = vars.fresh(player);
        let p_match = format!(
            "{rel_match}{rel} ({}: {p}); {p} isa {player}; ",
            rule.pointed_role
        );
        // Innermost first: the entry's own sub-structures go before the
        // entry itself.
        if let (Some(mapping), Some(obj)) = (player_mapping, item.as_object()) {
            for (sub_prop, sub_value) in obj {
                let Some(spec) = mapping.property(sub_prop) else {
                    continue;
                };
                if !spec.is_structural() {
                    continue;
                }
                let sub_rule = registry
                    .structural_rule_for(player, sub_prop)
                    .map_err(|_| CompileError::UnknownShape {
                        name: sub_prop.clone(),
                        context: format!("planning deletion inside `{player}`"),
                    })?
                    .clone();
                delete_structural(
                    registry, vars, plan, &p_match, &p, player, sub_prop, &sub_rule, sub_value,
                )?;
            }
        }
        player_vars.push((p, p_match));
    }
    for (p, p_match) in player_vars {
        plan.steps.push(DeleteStep {
            match_ql: p_match,
            delete_ql: format!("{p} isa {player}; "),
        });
    }
    plan.steps.push(DeleteStep {
        match_ql: rel_match,
        delete_ql: format!("{rel} isa {}; ", rule.relation),
    });
    Ok(())
}

fn delete_owned_players(
    vars: &mut VarAllocator,
    plan: &mut DeletePlan,
    match_prefix: &str,
    owner_var: &str,
    rule: &StructuralRule,
    player: &str,
) {
    let rel = vars.fresh(&rule.relation);
    let rel_match = format!(
        "{match_prefix}{rel} ({}: {owner_var}) isa {}; ",
        rule.owner_role, rule.relation
    );
    let p = vars.fresh(player);
    plan.steps.push(DeleteStep {
        match_ql: format!(
            "{rel_match}{rel} ({}: {p}); {p} isa {player}; ",
            rule.pointed_role
        ),
        delete_ql: format!("{p} isa {player}; "),
    });
    plan.steps.push(DeleteStep {
        match_ql: rel_match,
        delete_ql: format!("{rel} isa {}; ", rule.relation),
    });
}

/// Attribute type of the first marking selector that resolves to a scalar
/// property of the owner.
fn first_selector_attr(mapping: &TypeMapping, entry: &Value) -> Option<String> {
    let selectors = entry.get("selectors")?.as_array()?;
    for selector in selectors {
        let Some(selector) = selector.as_str() else {
            continue;
        };
        let base = selector.split('.').next().unwrap_or(selector);
        if let Some(spec) = mapping.property(base) {
            if !spec.is_structural() {
                return Some(spec.attr.clone());
            }
        }
    }
    None
}

fn collect_ref_ids(
    prop: &str,
    value: &Value,
    dep_list: &mut BTreeSet<DocId>,
) -> Result<(), CompileError> {
    let mut push = |raw: &str| -> Result<(), CompileError> {
        let id = DocId::parse(raw).map_err(|e| CompileError::InvalidProperty {
            prop: prop.to_string(),
            reason: e.to_string(),
        })?;
        dep_list.insert(id);
        Ok(())
    };
    match value {
        Value::String(raw) => push(raw),
        Value::Array(items) => {
            for item in items {
                if let Some(raw) = item.as_str() {
                    push(raw)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use stixql_schema::{ObjectKind, PropertySpec, TypeMapping};

    const IDENTITY_A: &str = "identity--8c6af861-7b20-41ef-9b59-6344fd872a8f";
    const IDENTITY_B: &str = "identity--21f3d4a5-6e2c-4e7f-9d11-0b8f4a2e7c31";
    const FILE_A: &str = "file--5e1f6b3a-9c44-4d8b-b6a7-2f0e9d8c7b6a";
    const REL_A: &str = "relationship--44298a74-ba52-4f0c-87a3-1824e67d7fad";

    fn registry() -> SchemaRegistry {
        let identity = TypeMapping {
            kind: ObjectKind::Entity,
            properties: [
                ("name".to_string(), PropertySpec::scalar("name")),
                ("created_by_ref".to_string(), PropertySpec::structural()),
            ]
            .into(),
            structurals: [(
                "created_by_ref".to_string(),
                StructuralRule {
                    category: StructuralCategory::EmbeddedReference,
                    relation: "created-by".to_string(),
                    owner_role: "created".to_string(),
                    pointed_role: "creator".to_string(),
                    player: None,
                    key_attr: None,
                    value_attr: None,
                },
            )]
            .into(),
        };
        let file = TypeMapping {
            kind: ObjectKind::Entity,
            properties: [("hashes".to_string(), PropertySpec::structural())].into(),
            structurals: [(
                "hashes".to_string(),
                StructuralRule {
                    category: StructuralCategory::Hash,
                    relation: "file-hashes".to_string(),
                    owner_role: "hash-owner".to_string(),
                    pointed_role: "hash".to_string(),
                    player: None,
                    key_attr: None,
                    value_attr: None,
                },
            )]
            .into(),
        };
        let relationship = TypeMapping {
            kind: ObjectKind::Relation,
            properties: [
                (
                    "relationship_type".to_string(),
                    PropertySpec::scalar("relationship-type"),
                ),
                ("source_ref".to_string(), PropertySpec::structural()),
                ("target_ref".to_string(), PropertySpec::structural()),
            ]
            .into(),
            structurals: [
                (
                    "source_ref".to_string(),
                    StructuralRule {
                        category: StructuralCategory::StandardRelation,
                        relation: String::new(),
                        owner_role: String::new(),
                        pointed_role: "source".to_string(),
                        player: None,
                        key_attr: None,
                        value_attr: None,
                    },
                ),
                (
                    "target_ref".to_string(),
                    StructuralRule {
                        category: StructuralCategory::StandardRelation,
                        relation: String::new(),
                        owner_role: String::new(),
                        pointed_role: "target".to_string(),
                        player: None,
                        key_attr: None,
                        value_attr: None,
                    },
                ),
            ]
            .into(),
        };
        SchemaRegistry::builder()
            .mapping("identity", identity)
            .mapping("file", file)
            .mapping("relationship", relationship)
            .hash_entity("SHA-256", "sha-256")
            .standard_relation("uses", "relationship")
            .finish()
            .unwrap()
    }

    fn plan(value: serde_json::Value) -> DeletePlan {
        let doc = Document::from_json(value).unwrap();
        plan_delete(&doc, &registry()).unwrap()
    }

    #[test]
    fn relations_go_before_attributes_before_the_entity() {
        let plan = plan(json!({
            "type": "identity",
            "id": IDENTITY_A,
            "name": "ACME",
            "created_by_ref": IDENTITY_B,
        }));
        let kinds: Vec<&str> = plan
            .steps
            .iter()
            .map(|s| {
                if s.delete_ql.contains("isa created-by") {
                    "relation"
                } else if s.delete_ql.contains("isa identity") {
                    "entity"
                } else {
                    "attribute"
                }
            })
            .collect();
        assert_eq!(kinds, vec!["relation", "attribute", "attribute", "entity"]);
        assert_eq!(
            plan.dep_list.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec![IDENTITY_B.to_string()]
        );
    }

    #[test]
    fn reference_relations_never_delete_the_pointed_player() {
        let plan = plan(json!({
            "type": "identity",
            "id": IDENTITY_A,
            "created_by_ref": IDENTITY_B,
        }));
        let rel_step = &plan.steps[0];
        assert!(rel_step.delete_ql.contains("isa created-by"));
        assert!(!rel_step.delete_ql.contains("isa identity"));
    }

    #[test]
    fn attribute_steps_guard_against_shared_owners() {
        let plan = plan(json!({
            "type": "identity",
            "id": IDENTITY_A,
            "name": "ACME",
        }));
        let name_step = plan
            .steps
            .iter()
            .find(|s| s.delete_ql.contains("isa name"))
            .unwrap();
        assert!(name_step.match_ql.contains("not { $other has name"));
        assert!(name_step.match_ql.contains("not { $other is $identity_0; }"));
    }

    #[test]
    fn owned_hash_entities_are_deleted_with_their_relation() {
        let plan = plan(json!({
            "type": "file",
            "id": FILE_A,
            "hashes": { "SHA-256": "deadbeef" },
        }));
        let deletes: Vec<&str> = plan.steps.iter().map(|s| s.delete_ql.as_str()).collect();
        let hash_pos = deletes.iter().position(|d| d.contains("isa sha-256")).unwrap();
        let rel_pos = deletes
            .iter()
            .position(|d| d.contains("isa file-hashes"))
            .unwrap();
        assert!(hash_pos < rel_pos);
    }

    #[test]
    fn relation_documents_delete_under_their_dynamic_type() {
        let plan = plan(json!({
            "type": "relationship",
            "id": REL_A,
            "relationship_type": "uses",
            "source_ref": IDENTITY_A,
            "target_ref": IDENTITY_B,
        }));
        let last = plan.steps.last().unwrap();
        assert!(last.match_ql.contains("isa uses, has stix-id"));
        assert!(last.delete_ql.ends_with("isa uses; "));
        assert_eq!(plan.dep_list.len(), 2);
    }

    #[test]
    fn step_query_renders_match_then_delete() {
        let plan = plan(json!({ "type": "identity", "id": IDENTITY_A }));
        let q = plan.steps.last().unwrap().query();
        assert!(q.starts_with("match $identity_0 isa identity"));
        assert!(q.contains(" delete $identity_0 isa identity; "));
    }
}
