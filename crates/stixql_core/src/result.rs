use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One node of a typed query-result tree as returned by a graph store.
///
/// An entity carries its scalar attributes plus the relations it plays a role
/// in; a relation carries named roles, each bound to one or more players; an
/// attribute is a bare typed value (relations may bind attribute players
/// directly, e.g. granular markings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultNode {
    Entity(EntityNode),
    Relation(RelationNode),
    Attribute(AttributeNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    /// Graph entity type (matches the document type).
    pub ty: String,
    pub attrs: Vec<AttributeNode>,
    /// Relations this entity owns (discovered by the store when expanding
    /// the entity), excluding the relation the entity was reached through.
    #[serde(default)]
    pub relations: Vec<RelationNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationNode {
    /// Graph relation type.
    pub ty: String,
    #[serde(default)]
    pub attrs: Vec<AttributeNode>,
    pub roles: Vec<RolePlayers>,
    /// Further relations the relation instance itself plays the owner role
    /// in (relationship documents own sub-structures too).
    #[serde(default)]
    pub relations: Vec<RelationNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePlayers {
    pub role: String,
    pub players: Vec<ResultNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeNode {
    /// Graph attribute type (e.g. `stix-id`, `name`).
    pub ty: String,
    pub value: Value,
}

impl EntityNode {
    /// First value of the named attribute, if present.
    pub fn attr(&self, ty: &str) -> Option<&Value> {
        self.attrs.iter().find(|a| a.ty == ty).map(|a| &a.value)
    }

    /// The entity's `stix-id` attribute as a string, if present.
    pub fn stix_id(&self) -> Option<&str> {
        self.attr("stix-id").and_then(Value::as_str)
    }
}

impl RelationNode {
    pub fn players_of(&self, role: &str) -> &[ResultNode] {
        self.roles
            .iter()
            .find(|r| r.role == role)
            .map(|r| r.players.as_slice())
            .unwrap_or(&[])
    }

    pub fn attr(&self, ty: &str) -> Option<&Value> {
        self.attrs.iter().find(|a| a.ty == ty).map(|a| &a.value)
    }
}
