//! Fetch-side fidelity: typed result trees decode back to the exact
//! documents that were submitted, for every supported structural shape.

mod common;

use common::{documents, engine, id};
use serde_json::{json, Value};
use stixql_core::{AttributeNode, Document, EntityNode, RelationNode, ResultNode, RolePlayers};

const IDENTITY_A: &str = "identity--a1a1a1a1-1111-4111-8111-111111111111";
const IDENTITY_B: &str = "identity--b2b2b2b2-2222-4222-8222-222222222222";
const MALWARE_M: &str = "malware--c3c3c3c3-3333-4333-8333-333333333333";
const MARKING_TLP: &str = "marking-definition--d4d4d4d4-4444-4444-8444-444444444444";
const FILE_F: &str = "file--2c2c2c2c-9999-4999-8999-999999999999";
const DIRECTORY_D: &str = "directory--1b1b1b1b-8888-4888-8888-888888888888";

fn attr(ty: &str, value: Value) -> AttributeNode {
    AttributeNode {
        ty: ty.to_string(),
        value,
    }
}

/// Entity carrying only its identity, as a store returns relation players it
/// was not asked to expand.
fn stub(ty: &str, stix_id: &str) -> ResultNode {
    ResultNode::Entity(EntityNode {
        ty: ty.to_string(),
        attrs: vec![attr("stix-id", json!(stix_id))],
        relations: Vec::new(),
    })
}

fn entity(ty: &str, attrs: Vec<AttributeNode>, relations: Vec<RelationNode>) -> ResultNode {
    ResultNode::Entity(EntityNode {
        ty: ty.to_string(),
        attrs,
        relations,
    })
}

fn relation(ty: &str, roles: Vec<(&str, Vec<ResultNode>)>) -> RelationNode {
    RelationNode {
        ty: ty.to_string(),
        attrs: Vec::new(),
        roles: roles
            .into_iter()
            .map(|(role, players)| RolePlayers {
                role: role.to_string(),
                players,
            })
            .collect(),
        relations: Vec::new(),
    }
}

fn fixture(name: &str, raw_id: &str) -> Document {
    documents(name)
        .into_iter()
        .find(|d| d.id == id(raw_id))
        .unwrap()
}

#[test]
fn identity_with_embedded_reference_round_trips() {
    let engine = engine();
    engine.store().put_tree(
        id(IDENTITY_B),
        entity(
            "identity",
            vec![
                attr("stix-id", json!(IDENTITY_B)),
                attr("name", json!("Blue Team")),
                attr("identity-class", json!("organization")),
            ],
            vec![relation(
                "created-by",
                vec![("creator", vec![stub("identity", IDENTITY_A)])],
            )],
        ),
    );
    let decoded = engine.fetch(&id(IDENTITY_B)).unwrap().unwrap();
    assert_eq!(decoded, fixture("basic_batch.json", IDENTITY_B));
}

#[test]
fn malware_with_markings_round_trips() {
    let engine = engine();
    engine.store().put_tree(
        id(MALWARE_M),
        entity(
            "malware",
            vec![
                attr("stix-id", json!(MALWARE_M)),
                attr("name", json!("redleaf")),
                attr("is-family", json!(true)),
                attr("label", json!("trojan")),
                attr("label", json!("backdoor")),
            ],
            vec![
                relation(
                    "created-by",
                    vec![("creator", vec![stub("identity", IDENTITY_B)])],
                ),
                relation(
                    "object-marking",
                    vec![("marking", vec![stub("marking-definition", MARKING_TLP)])],
                ),
                relation(
                    "granular-marking",
                    vec![
                        ("marking", vec![stub("marking-definition", MARKING_TLP)]),
                        (
                            "marked",
                            vec![
                                ResultNode::Attribute(attr("name", json!("redleaf"))),
                                ResultNode::Attribute(attr("label", json!("trojan"))),
                            ],
                        ),
                    ],
                ),
            ],
        ),
    );
    let decoded = engine.fetch(&id(MALWARE_M)).unwrap().unwrap();
    assert_eq!(decoded, fixture("basic_batch.json", MALWARE_M));
}

#[test]
fn marking_definition_key_values_round_trip() {
    let engine = engine();
    engine.store().put_tree(
        id(MARKING_TLP),
        entity(
            "marking-definition",
            vec![
                attr("stix-id", json!(MARKING_TLP)),
                attr("definition-type", json!("tlp")),
            ],
            vec![relation(
                "marking-content",
                vec![(
                    "entry",
                    vec![entity(
                        "marking-entry",
                        vec![
                            attr("marking-key", json!("tlp")),
                            attr("marking-value", json!("red")),
                        ],
                        Vec::new(),
                    )],
                )],
            )],
        ),
    );
    let decoded = engine.fetch(&id(MARKING_TLP)).unwrap().unwrap();
    assert_eq!(decoded, fixture("basic_batch.json", MARKING_TLP));
}

#[test]
fn deeply_nested_file_round_trips() {
    let engine = engine();
    let text_section = entity(
        "pe-section",
        vec![
            attr("section-name", json!(".text")),
            attr("section-size", json!(2048)),
        ],
        vec![relation(
            "section-hashes",
            vec![(
                "hash",
                vec![entity(
                    "md5",
                    vec![attr("hash-value", json!("900150983cd24fb0d6963f7d28e17f72"))],
                    Vec::new(),
                )],
            )],
        )],
    );
    let data_section = entity(
        "pe-section",
        vec![
            attr("section-name", json!(".data")),
            attr("section-size", json!(1024)),
        ],
        Vec::new(),
    );
    let pe_binary = entity(
        "pe-binary",
        vec![
            attr("pe-type", json!("exe")),
            attr("number-of-sections", json!(2)),
        ],
        vec![relation(
            "pe-sections",
            vec![("section", vec![text_section, data_section])],
        )],
    );
    engine.store().put_tree(
        id(FILE_F),
        entity(
            "file",
            vec![
                attr("stix-id", json!(FILE_F)),
                attr("file-name", json!("dropper.exe")),
                attr("size", json!(4096)),
            ],
            vec![
                relation(
                    "file-hashes",
                    vec![(
                        "hash",
                        vec![
                            entity(
                                "md5",
                                vec![attr(
                                    "hash-value",
                                    json!("0cc175b9c0f1b6a831c399e269772661"),
                                )],
                                Vec::new(),
                            ),
                            entity(
                                "sha-256",
                                vec![attr(
                                    "hash-value",
                                    json!("2e7d2c03a9507ae265ecf5b5356885a53393a2029d241394997265a1a25aefc6"),
                                )],
                                Vec::new(),
                            ),
                        ],
                    )],
                ),
                relation(
                    "directory-contains",
                    vec![("directory", vec![stub("directory", DIRECTORY_D)])],
                ),
                relation(
                    "pe-binary-extension",
                    vec![("extension", vec![pe_binary])],
                ),
            ],
        ),
    );
    let decoded = engine.fetch(&id(FILE_F)).unwrap().unwrap();
    assert_eq!(decoded, fixture("deep_file.json", FILE_F));
}

#[test]
fn relation_roots_round_trip() {
    let engine = engine();
    let rel_id = "relationship--5f5f5f5f-cccc-4ccc-8ccc-cccccccccccc";
    let sighting_id = "sighting--6a6a6a6a-dddd-4ddd-8ddd-dddddddddddd";
    let malware = "malware--3d3d3d3d-aaaa-4aaa-8aaa-aaaaaaaaaaaa";
    let identity = "identity--4e4e4e4e-bbbb-4bbb-8bbb-bbbbbbbbbbbb";

    engine.store().put_tree(
        id(rel_id),
        ResultNode::Relation(RelationNode {
            ty: "uses".to_string(),
            attrs: vec![attr("stix-id", json!(rel_id))],
            roles: vec![
                RolePlayers {
                    role: "source".to_string(),
                    players: vec![stub("malware", malware)],
                },
                RolePlayers {
                    role: "target".to_string(),
                    players: vec![stub("identity", identity)],
                },
            ],
            relations: Vec::new(),
        }),
    );
    let decoded = engine.fetch(&id(rel_id)).unwrap().unwrap();
    assert_eq!(decoded, fixture("relationship_batch.json", rel_id));

    engine.store().put_tree(
        id(sighting_id),
        ResultNode::Relation(RelationNode {
            ty: "sighting".to_string(),
            attrs: vec![attr("stix-id", json!(sighting_id)), attr("count", json!(3))],
            roles: vec![
                RolePlayers {
                    role: "sighted".to_string(),
                    players: vec![stub("malware", malware)],
                },
                RolePlayers {
                    role: "where-sighted".to_string(),
                    players: vec![stub("identity", identity)],
                },
            ],
            relations: Vec::new(),
        }),
    );
    let decoded = engine.fetch(&id(sighting_id)).unwrap().unwrap();
    assert_eq!(decoded, fixture("relationship_batch.json", sighting_id));
}

#[test]
fn fetching_an_absent_identity_returns_none() {
    let engine = engine();
    assert!(engine.fetch(&id(IDENTITY_A)).unwrap().is_none());
}
