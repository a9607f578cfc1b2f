use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use stixql_core::{render_literal, DocId, Document};
use stixql_schema::{
    ObjectKind, SchemaRegistry, StructuralCategory, StructuralRule, TypeMapping,
};

use crate::error::CompileError;
use crate::fragment::Fragment;
use crate::vars::VarAllocator;

/// Named relaxation of scalar validation for properties with no mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeProfile {
    /// Any unmapped property fails the document.
    Strict,
    /// Unmapped properties are logged and skipped.
    DropUnknown,
    /// Like `DropUnknown`, but `created`/`modified` timestamps pass through
    /// on types whose map omits them.
    AllowTimestamps,
}

impl Default for SanitizeProfile {
    fn default() -> Self {
        SanitizeProfile::DropUnknown
    }
}

/// Compiles one document into a [`Fragment`] according to the schema
/// registry. Stateless apart from configuration; a fresh variable allocator
/// is created per fragment.
#[derive(Debug, Clone, Copy)]
pub struct Encoder<'a> {
    registry: &'a SchemaRegistry,
    sanitize: SanitizeProfile,
    strict: bool,
}

impl<'a> Encoder<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Encoder {
            registry,
            sanitize: SanitizeProfile::default(),
            strict: false,
        }
    }

    pub fn with_sanitize(mut self, sanitize: SanitizeProfile) -> Self {
        self.sanitize = sanitize;
        self
    }

    /// Escalate internal inconsistencies (e.g. unresolvable marking
    /// selectors) to errors instead of logged skips.
    pub fn with_strict_failure(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn encode(&self, doc: &Document) -> Result<Fragment, CompileError> {
        let mapping = self
            .registry
            .mapping_for(&doc.ty)
            .map_err(|_| CompileError::UnsupportedType(doc.ty.clone()))?;

        let mut ctx = Ctx {
            registry: self.registry,
            sanitize: self.sanitize,
            strict: self.strict,
            vars: VarAllocator::new(),
            dep_match: String::new(),
            dep_insert: String::new(),
            dep_attr_matches: String::new(),
            sub_entities: String::new(),
            owner_rels: String::new(),
            dep_list: BTreeSet::new(),
            splittable: true,
        };

        let self_var = ctx.vars.fresh(&doc.ty);
        let id_lit = render_literal(&Value::String(doc.id.to_string()));
        let core_ql = format!("{self_var} isa {}, has stix-id {id_lit}; ", doc.ty);

        // Scalar pass: has-clauses on the document variable, one binding
        // statement per value, and the selector → variable table consumed by
        // granular markings.
        let mut scalars = scalar_pass(&mut ctx, mapping, &doc.ty, &doc.properties)?;
        let id_var = ctx.vars.fresh("stix-id");
        scalars
            .has_clauses
            .insert(0, format!("has stix-id {id_var}"));
        scalars
            .bindings
            .insert(0, format!("{id_var} {id_lit} isa stix-id; "));

        // Structural pass.
        let mut standard = StandardRelationParts::default();
        for (prop, value) in &doc.properties {
            let Some(spec) = mapping.property(prop) else {
                continue; // handled by the scalar pass
            };
            if !spec.is_structural() {
                continue;
            }
            let rule = self
                .registry
                .structural_rule_for(&doc.ty, prop)
                .map_err(|_| CompileError::UnknownShape {
                    name: prop.clone(),
                    context: format!("encoding `{}`", doc.ty),
                })?;
            encode_structural(
                &mut ctx,
                &self_var,
                &doc.ty,
                prop,
                rule,
                value,
                Some(&scalars.selector_vars),
                Some(&mut standard),
            )?;
        }

        let has_tail = scalars.has_clauses.join(", ");
        let bindings: String = scalars.bindings.concat();

        let fragment = match mapping.kind {
            ObjectKind::Entity => {
                let decl = format!("{self_var} isa {}, {has_tail}; ", doc.ty);
                Fragment {
                    dep_match: ctx.dep_match,
                    dep_insert: ctx.dep_insert,
                    indep_ql: format!("{decl}{bindings}{}{}", ctx.sub_entities, ctx.owner_rels),
                    core_ql,
                    dep_list: ctx.dep_list,
                    dep_attr_matches: ctx.dep_attr_matches,
                    phase_splittable: ctx.splittable,
                }
            }
            ObjectKind::Relation => {
                if standard.role_bindings.is_empty() {
                    return Err(CompileError::InvalidProperty {
                        prop: "source_ref".to_string(),
                        reason: "relation document binds no role players".to_string(),
                    });
                }
                // A dynamic standard-relation rule takes the relation type
                // from the document's own relationship_type value.
                let relation = standard
                    .relation
                    .clone()
                    .or_else(|| {
                        doc.property("relationship_type")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .ok_or_else(|| CompileError::InvalidProperty {
                        prop: "relationship_type".to_string(),
                        reason: "relation type could not be determined".to_string(),
                    })?;
                let decl = format!(
                    "{self_var} ({}) isa {relation}, {has_tail}; ",
                    standard.role_bindings.join(", ")
                );
                // The document's identity is carried by the relation
                // instance, which cannot exist before its endpoints: nothing
                // can stand alone in a first phase.
                Fragment {
                    dep_match: ctx.dep_match,
                    dep_insert: format!(
                        "{decl}{bindings}{}{}{}",
                        ctx.sub_entities, ctx.owner_rels, ctx.dep_insert
                    ),
                    indep_ql: String::new(),
                    core_ql,
                    dep_list: ctx.dep_list,
                    dep_attr_matches: ctx.dep_attr_matches,
                    phase_splittable: false,
                }
            }
        };
        Ok(fragment)
    }
}

struct Ctx<'a> {
    registry: &'a SchemaRegistry,
    sanitize: SanitizeProfile,
    strict: bool,
    vars: VarAllocator,
    dep_match: String,
    dep_insert: String,
    dep_attr_matches: String,
    /// Self-contained sub-entity declarations (insertable without matches).
    sub_entities: String,
    /// Relations binding sub-entities to their owner (no foreign matches).
    owner_rels: String,
    dep_list: BTreeSet<DocId>,
    splittable: bool,
}

struct ScalarOut {
    has_clauses: Vec<String>,
    bindings: Vec<String>,
    /// selector (`prop` or `prop.[i]`) → (variable, attribute type).
    selector_vars: BTreeMap<String, (String, String)>,
}

#[derive(Default)]
struct StandardRelationParts {
    relation: Option<String>,
    role_bindings: Vec<String>,
}

fn scalar_pass(
    ctx: &mut Ctx<'_>,
    mapping: &TypeMapping,
    ty: &str,
    props: &BTreeMap<String, Value>,
) -> Result<ScalarOut, CompileError> {
    let mut out = ScalarOut {
        has_clauses: Vec::new(),
        bindings: Vec::new(),
        selector_vars: BTreeMap::new(),
    };
    for (prop, value) in props {
        let spec = match mapping.property(prop) {
            Some(spec) => spec,
            None => {
                match sanitize_unmapped(ctx.sanitize, ty, prop, value)? {
                    Some(attr) => {
                        emit_scalar(ctx, &mut out, prop, &attr, false, value)?;
                    }
                    None => {}
                }
                continue;
            }
        };
        if spec.is_structural() {
            continue;
        }
        emit_scalar(ctx, &mut out, prop, &spec.attr, spec.is_list, value)?;
    }
    Ok(out)
}

/// Apply the sanitize profile to a property with no mapping. `Some(attr)`
/// means "encode under this attribute type anyway".
fn sanitize_unmapped(
    sanitize: SanitizeProfile,
    ty: &str,
    prop: &str,
    value: &Value,
) -> Result<Option<String>, CompileError> {
    match sanitize {
        SanitizeProfile::Strict => Err(CompileError::InvalidProperty {
            prop: prop.to_string(),
            reason: format!("no mapping on type `{ty}`"),
        }),
        SanitizeProfile::AllowTimestamps
            if (prop == "created" || prop == "modified") && value.is_string() =>
        {
            Ok(Some(prop.to_string()))
        }
        SanitizeProfile::DropUnknown | SanitizeProfile::AllowTimestamps => {
            warn!(ty, prop, "dropping property with no schema mapping");
            Ok(None)
        }
    }
}

fn emit_scalar(
    ctx: &mut Ctx<'_>,
    out: &mut ScalarOut,
    prop: &str,
    attr: &str,
    is_list: bool,
    value: &Value,
) -> Result<(), CompileError> {
    if value.is_null() {
        warn!(prop, "skipping null property");
        return Ok(());
    }
    match (is_list, value) {
        (true, Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let lit = scalar_literal(prop, item)?;
                let var = ctx.vars.fresh(attr);
                out.has_clauses.push(format!("has {attr} {var}"));
                out.bindings.push(format!("{var} {lit} isa {attr}; "));
                out.selector_vars
                    .insert(format!("{prop}.[{i}]"), (var, attr.to_string()));
            }
            Ok(())
        }
        (true, _) => Err(CompileError::InvalidProperty {
            prop: prop.to_string(),
            reason: "list-valued property must be an array".to_string(),
        }),
        (false, Value::Array(_)) => Err(CompileError::InvalidProperty {
            prop: prop.to_string(),
            reason: "non-list property holds an array".to_string(),
        }),
        (false, item) => {
            let lit = scalar_literal(prop, item)?;
            let var = ctx.vars.fresh(attr);
            out.has_clauses.push(format!("has {attr} {var}"));
            out.bindings.push(format!("{var} {lit} isa {attr}; "));
            out.selector_vars
                .insert(prop.to_string(), (var, attr.to_string()));
            Ok(())
        }
    }
}

fn scalar_literal(prop: &str, value: &Value) -> Result<String, CompileError> {
    match value {
        Value::String(_) | Value::Bool(_) | Value::Number(_) => Ok(render_literal(value)),
        _ => Err(CompileError::InvalidProperty {
            prop: prop.to_string(),
            reason: "expected a scalar value".to_string(),
        }),
    }
}

/// Dispatch one sub-structure by its declared category. `selector_vars` and
/// `standard` are only available at document level; sub-objects pass `None`.
#[allow(clippy::too_many_arguments)]
fn encode_structural(
    ctx: &mut Ctx<'_>,
    owner_var: &str,
    ty: &str,
    prop: &str,
    rule: &StructuralRule,
    value: &Value,
    selector_vars: Option<&BTreeMap<String, (String, String)>>,
    standard: Option<&mut StandardRelationParts>,
) -> Result<(), CompileError> {
    match rule.category {
        StructuralCategory::EmbeddedReference => {
            encode_embedded(ctx, owner_var, prop, rule, value)
        }
        StructuralCategory::StandardRelation => match standard {
            Some(parts) => encode_standard_role(ctx, prop, rule, value, parts),
            None => Err(CompileError::InvalidProperty {
                prop: prop.to_string(),
                reason: "standard relation inside a sub-object".to_string(),
            }),
        },
        StructuralCategory::KeyValue => encode_key_value(ctx, owner_var, prop, rule, value),
        StructuralCategory::ListOfObjects => {
            encode_list_of_objects(ctx, owner_var, prop, rule, value)
        }
        StructuralCategory::Extension => encode_extensions(ctx, owner_var, ty, prop, value),
        StructuralCategory::Hash => encode_hashes(ctx, owner_var, prop, rule, value),
        StructuralCategory::GranularMarking => match selector_vars {
            Some(table) => encode_granular(ctx, owner_var, prop, rule, value, table),
            None => Err(CompileError::InvalidProperty {
                prop: prop.to_string(),
                reason: "granular markings inside a sub-object".to_string(),
            }),
        },
    }
}

fn ref_ids(prop: &str, value: &Value) -> Result<Vec<DocId>, CompileError> {
    let raw: Vec<&str> = match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str().ok_or_else(|| CompileError::InvalidProperty {
                    prop: prop.to_string(),
                    reason: "reference list holds a non-string".to_string(),
                })
            })
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(CompileError::InvalidProperty {
                prop: prop.to_string(),
                reason: "expected an identity string or list of them".to_string(),
            })
        }
    };
    raw.iter()
        .map(|s| {
            DocId::parse(s).map_err(|e| CompileError::InvalidProperty {
                prop: prop.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Match the foreign identity, bind owner and pointed-to roles. One relation
/// instance per referenced identity.
fn encode_embedded(
    ctx: &mut Ctx<'_>,
    owner_var: &str,
    prop: &str,
    rule: &StructuralRule,
    value: &Value,
) -> Result<(), CompileError> {
    for fid in ref_ids(prop, value)? {
        let mvar = ctx.vars.fresh(&rule.pointed_role);
        let lit = render_literal(&Value::String(fid.to_string()));
        ctx.dep_match
            .push_str(&format!("{mvar} isa {}, has stix-id {lit}; ", fid.type_part()));
        ctx.dep_insert.push_str(&format!(
            "({}: {owner_var}, {}: {mvar}) isa {}; ",
            rule.owner_role, rule.pointed_role, rule.relation
        ));
        ctx.dep_list.insert(fid);
    }
    Ok(())
}

fn encode_standard_role(
    ctx: &mut Ctx<'_>,
    prop: &str,
    rule: &StructuralRule,
    value: &Value,
    parts: &mut StandardRelationParts,
) -> Result<(), CompileError> {
    if !rule.relation.is_empty() {
        parts.relation.get_or_insert_with(|| rule.relation.clone());
    }
    for fid in ref_ids(prop, value)? {
        let mvar = ctx.vars.fresh(&rule.pointed_role);
        let lit = render_literal(&Value::String(fid.to_string()));
        ctx.dep_match
            .push_str(&format!("{mvar} isa {}, has stix-id {lit}; ", fid.type_part()));
        parts
            .role_bindings
            .push(format!("{}: {mvar}", rule.pointed_role));
        ctx.dep_list.insert(fid);
    }
    Ok(())
}

/// Per-key sub-entities carrying key/value attributes, all bound into one
/// owning relation. No foreign identities are involved.
fn encode_key_value(
    ctx: &mut Ctx<'_>,
    owner_var: &str,
    prop: &str,
    rule: &StructuralRule,
    value: &Value,
) -> Result<(), CompileError> {
    let entries = expect_object(prop, value)?;
    let player = rule.player.as_deref().unwrap_or("key-value");
    let key_attr = rule.key_attr.as_deref().unwrap_or("key");
    let value_attr = rule.value_attr.as_deref().unwrap_or("value");

    let mut pointed = Vec::new();
    for (key, val) in entries {
        let kv = ctx.vars.fresh(player);
        let key_lit = render_literal(&Value::String(key.clone()));
        let mut decl = format!("{kv} isa {player}, has {key_attr} {key_lit}");
        match val {
            Value::Array(items) => {
                for item in items {
                    decl.push_str(&format!(
                        ", has {value_attr} {}",
                        scalar_literal(prop, item)?
                    ));
                }
            }
            other => decl.push_str(&format!(
                ", has {value_attr} {}",
                scalar_literal(prop, other)?
            )),
        }
        decl.push_str("; ");
        ctx.sub_entities.push_str(&decl);
        pointed.push(format!("{}: {kv}", rule.pointed_role));
    }
    if !pointed.is_empty() {
        ctx.owner_rels.push_str(&format!(
            "({}: {owner_var}, {}) isa {}; ",
            rule.owner_role,
            pointed.join(", "),
            rule.relation
        ));
    }
    Ok(())
}

/// Each instance is compiled recursively through the shared sub-object
/// compiler; all instances bind into one relation with the owner.
fn encode_list_of_objects(
    ctx: &mut Ctx<'_>,
    owner_var: &str,
    prop: &str,
    rule: &StructuralRule,
    value: &Value,
) -> Result<(), CompileError> {
    let items = match value {
        Value::Array(items) => items,
        _ => {
            return Err(CompileError::InvalidProperty {
                prop: prop.to_string(),
                reason: "list-of-objects property must be an array".to_string(),
            })
        }
    };
    let player = rule
        .player
        .as_deref()
        .ok_or_else(|| CompileError::UnknownShape {
            name: prop.to_string(),
            context: "list-of-objects rule without player entity".to_string(),
        })?;
    let mut pointed = Vec::new();
    for item in items {
        let obj = expect_object(prop, item)?;
        let sub_var = encode_subobject(ctx, player, obj)?;
        pointed.push(format!("{}: {sub_var}", rule.pointed_role));
    }
    if !pointed.is_empty() {
        ctx.owner_rels.push_str(&format!(
            "({}: {owner_var}, {}) isa {}; ",
            rule.owner_role,
            pointed.join(", "),
            rule.relation
        ));
    }
    Ok(())
}

/// Each extension entry resolves its own rule (keyed by extension name) and
/// compiles as a single sub-object under that rule's relation.
fn encode_extensions(
    ctx: &mut Ctx<'_>,
    owner_var: &str,
    ty: &str,
    prop: &str,
    value: &Value,
) -> Result<(), CompileError> {
    let entries = expect_object(prop, value)?;
    for (name, record) in entries {
        let rule = ctx
            .registry
            .structural_rule_for(ty, name)
            .map_err(|_| CompileError::UnknownShape {
                name: name.clone(),
                context: format!("encoding extensions of `{ty}`"),
            })?
            .clone();
        let player = rule
            .player
            .as_deref()
            .ok_or_else(|| CompileError::UnknownShape {
                name: name.clone(),
                context: "extension rule without player entity".to_string(),
            })?;
        let obj = expect_object(name, record)?;
        let sub_var = encode_subobject(ctx, player, obj)?;
        ctx.owner_rels.push_str(&format!(
            "({}: {owner_var}, {}: {sub_var}) isa {}; ",
            rule.owner_role, rule.pointed_role, rule.relation
        ));
    }
    Ok(())
}

/// One sub-entity per present algorithm, one relation binding them all.
fn encode_hashes(
    ctx: &mut Ctx<'_>,
    owner_var: &str,
    prop: &str,
    rule: &StructuralRule,
    value: &Value,
) -> Result<(), CompileError> {
    let entries = expect_object(prop, value)?;
    let mut pointed = Vec::new();
    for (algo, digest) in entries {
        let entity = ctx
            .registry
            .hash_entity(algo)
            .ok_or_else(|| CompileError::UnknownShape {
                name: algo.clone(),
                context: "encoding hashes".to_string(),
            })?
            .to_string();
        let hvar = ctx.vars.fresh(&entity);
        let lit = scalar_literal(prop, digest)?;
        ctx.sub_entities
            .push_str(&format!("{hvar} isa {entity}, has hash-value {lit}; "));
        pointed.push(format!("{}: {hvar}", rule.pointed_role));
    }
    if !pointed.is_empty() {
        ctx.owner_rels.push_str(&format!(
            "({}: {owner_var}, {}) isa {}; ",
            rule.owner_role,
            pointed.join(", "),
            rule.relation
        ));
    }
    Ok(())
}

/// Match the marking identity; bind it with the scalar-pass variables the
/// selectors address. Selectors addressing a list element resolve to that
/// element's indexed variable.
fn encode_granular(
    ctx: &mut Ctx<'_>,
    owner_var: &str,
    prop: &str,
    rule: &StructuralRule,
    value: &Value,
    selector_vars: &BTreeMap<String, (String, String)>,
) -> Result<(), CompileError> {
    let markings = match value {
        Value::Array(items) => items,
        _ => {
            return Err(CompileError::InvalidProperty {
                prop: prop.to_string(),
                reason: "granular markings must be a list".to_string(),
            })
        }
    };
    for marking in markings {
        let obj = expect_object(prop, marking)?;
        let marking_id = obj
            .get("marking_ref")
            .and_then(Value::as_str)
            .ok_or_else(|| CompileError::InvalidProperty {
                prop: prop.to_string(),
                reason: "granular marking missing marking_ref".to_string(),
            })?;
        let marking_id = DocId::parse(marking_id).map_err(|e| CompileError::InvalidProperty {
            prop: prop.to_string(),
            reason: e.to_string(),
        })?;
        let selectors = match obj.get("selectors") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(CompileError::InvalidProperty {
                    prop: prop.to_string(),
                    reason: "granular marking missing selectors".to_string(),
                })
            }
        };

        let mvar = ctx.vars.fresh(&rule.owner_role);
        let lit = render_literal(&Value::String(marking_id.to_string()));
        ctx.dep_match.push_str(&format!(
            "{mvar} isa {}, has stix-id {lit}; ",
            marking_id.type_part()
        ));
        ctx.dep_list.insert(marking_id);

        let mut marked = Vec::new();
        for selector in selectors {
            let Some(selector) = selector.as_str() else {
                return Err(CompileError::InvalidProperty {
                    prop: prop.to_string(),
                    reason: "selector is not a string".to_string(),
                });
            };
            match selector_vars.get(selector) {
                Some((var, attr)) => {
                    marked.push(format!("{}: {var}", rule.pointed_role));
                    // Re-bind the scalar-pass variable for a phase-2 query,
                    // where the attribute already exists on the stored owner.
                    ctx.dep_attr_matches
                        .push_str(&format!("{owner_var} has {attr} {var}; "));
                }
                None if ctx.strict => {
                    return Err(CompileError::SelectorUnresolved(selector.to_string()))
                }
                None => {
                    warn!(selector, "marking selector addresses no encoded property");
                }
            }
        }
        if !marked.is_empty() {
            ctx.dep_insert.push_str(&format!(
                "({}: {mvar}, {}) isa {}; ",
                rule.owner_role,
                marked.join(", "),
                rule.relation
            ));
        }
    }
    Ok(())
}

/// Compile one nested sub-record: its own scalar/structural split through the
/// same dispatch, so arbitrarily nested structures are supported by
/// construction. Returns the sub-entity's variable.
fn encode_subobject(
    ctx: &mut Ctx<'_>,
    player_ty: &str,
    obj: &Map<String, Value>,
) -> Result<String, CompileError> {
    let registry = ctx.registry;
    let mapping = registry
        .mapping_for(player_ty)
        .map_err(|_| CompileError::UnknownShape {
            name: player_ty.to_string(),
            context: "encoding sub-object".to_string(),
        })?
        .clone();

    let sub_var = ctx.vars.fresh(player_ty);
    let props: BTreeMap<String, Value> =
        obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

    let scalars = scalar_pass(ctx, &mapping, player_ty, &props)?;
    let has_tail: String = scalars
        .has_clauses
        .iter()
        .map(|h| format!(", {h}"))
        .collect();
    ctx.sub_entities
        .push_str(&format!("{sub_var} isa {player_ty}{has_tail}; "));
    ctx.sub_entities.push_str(&scalars.bindings.concat());

    for (prop, value) in &props {
        let Some(spec) = mapping.property(prop) else {
            continue;
        };
        if !spec.is_structural() {
            continue;
        }
        let rule = registry
            .structural_rule_for(player_ty, prop)
            .map_err(|_| CompileError::UnknownShape {
                name: prop.clone(),
                context: format!("encoding sub-object `{player_ty}`"),
            })?
            .clone();
        let before = ctx.dep_insert.len();
        encode_structural(ctx, &sub_var, player_ty, prop, &rule, value, None, None)?;
        if ctx.dep_insert.len() > before {
            // dep_insert now references this sub-object's variable, which a
            // second phase could not re-match.
            ctx.splittable = false;
        }
    }
    Ok(sub_var)
}

fn expect_object<'v>(
    prop: &str,
    value: &'v Value,
) -> Result<&'v Map<String, Value>, CompileError> {
    value.as_object().ok_or_else(|| CompileError::InvalidProperty {
        prop: prop.to_string(),
        reason: "expected a JSON object".to_string(),
    })
}
