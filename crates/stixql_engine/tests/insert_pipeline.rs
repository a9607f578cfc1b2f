mod common;

use common::{documents, engine, id, insert_section, registry};
use serde_json::json;
use stixql_core::Document;
use stixql_engine::{Engine, EngineConfig, OutcomeStatus, StaticResolver};
use stixql_store::MemoryStore;

const IDENTITY_A: &str = "identity--a1a1a1a1-1111-4111-8111-111111111111";
const IDENTITY_B: &str = "identity--b2b2b2b2-2222-4222-8222-222222222222";
const MALWARE_M: &str = "malware--c3c3c3c3-3333-4333-8333-333333333333";
const MARKING_TLP: &str = "marking-definition--d4d4d4d4-4444-4444-8444-444444444444";
const ABSENT: &str = "identity--adadadad-1212-4121-8121-121212121212";
const ORPHAN: &str = "malware--9d9d9d9d-0000-4000-8000-000000000000";

fn orphan_doc() -> Document {
    Document::from_json(json!({
        "type": "malware",
        "id": ORPHAN,
        "name": "stray",
        "created_by_ref": ABSENT,
    }))
    .unwrap()
}

fn absent_identity() -> Document {
    Document::from_json(json!({
        "type": "identity",
        "id": ABSENT,
        "name": "Late Arrival",
    }))
    .unwrap()
}

#[test]
fn batch_inserts_in_dependency_order() {
    let engine = engine();
    let report = engine.add(documents("basic_batch.json")).unwrap();
    assert!(report.all_succeeded(), "outcomes: {:?}", report.outcomes);

    let log = engine.store().insert_log();
    let pos = |needle: &str| {
        log.iter()
            .position(|q| insert_section(q).contains(needle))
            .unwrap_or_else(|| panic!("no insert for {needle}"))
    };
    assert!(pos(IDENTITY_A) < pos(IDENTITY_B));
    assert!(pos(IDENTITY_B) < pos(MALWARE_M));
    assert!(pos(MARKING_TLP) < pos(MALWARE_M));

    for raw in [IDENTITY_A, IDENTITY_B, MALWARE_M, MARKING_TLP] {
        assert!(engine.store().contains(&id(raw)));
    }
}

#[test]
fn resubmitting_a_batch_excludes_every_document() {
    let engine = engine();
    engine.add(documents("basic_batch.json")).unwrap();
    let second = engine.add(documents("basic_batch.json")).unwrap();
    assert_eq!(second.count(OutcomeStatus::AlreadyInDatabase), 4);
    assert_eq!(second.count(OutcomeStatus::Success), 0);
}

#[test]
fn missing_dependency_reports_the_exact_ids_and_recovers_later() {
    let engine = engine();
    let report = engine.add(vec![orphan_doc()]).unwrap();
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, OutcomeStatus::MissingDependency);
    assert_eq!(outcome.missing, vec![id(ABSENT)]);
    assert!(!engine.store().contains(&id(ORPHAN)));

    // A later batch supplies the dependency; resubmission then succeeds
    // because the reference is found in the database.
    engine.add(vec![absent_identity()]).unwrap();
    let retry = engine.add(vec![orphan_doc()]).unwrap();
    assert_eq!(retry.outcomes[0].status, OutcomeStatus::Success);
    assert!(engine.store().contains(&id(ORPHAN)));
}

#[test]
fn resolver_is_consulted_for_missing_references() {
    let engine = Engine::new(registry(), MemoryStore::new(), EngineConfig::default())
        .with_resolver(Box::new(StaticResolver::new([absent_identity()])));
    let report = engine.add(vec![orphan_doc()]).unwrap();
    assert!(report.all_succeeded(), "outcomes: {:?}", report.outcomes);
    assert_eq!(report.outcomes.len(), 2);
    assert!(engine.store().contains(&id(ABSENT)));
    assert!(engine.store().contains(&id(ORPHAN)));
}

#[test]
fn self_reference_inserts_in_two_phases() {
    let engine = engine();
    let report = engine.add(documents("self_cycle.json")).unwrap();
    assert!(report.all_succeeded(), "outcomes: {:?}", report.outcomes);

    let log = engine.store().insert_log();
    assert_eq!(log.len(), 2);
    assert!(log[0].starts_with("insert "));
    assert!(log[1].starts_with("match "));
    assert!(log[1].contains("isa created-by"));
}

#[test]
fn mutual_references_insert_identities_before_cross_references() {
    let engine = engine();
    let report = engine.add(documents("cycle_pair.json")).unwrap();
    assert!(report.all_succeeded(), "outcomes: {:?}", report.outcomes);

    let log = engine.store().insert_log();
    assert_eq!(log.len(), 4);
    assert!(log[0].starts_with("insert ") && log[1].starts_with("insert "));
    assert!(log[2].starts_with("match ") && log[3].starts_with("match "));
}

#[test]
fn unsplittable_cycle_fails_every_member() {
    let engine = engine();
    let report = engine.add(documents("unsplittable_cycle.json")).unwrap();
    assert_eq!(report.count(OutcomeStatus::CyclicalDependency), 2);
    assert!(engine.store().insert_log().is_empty());
}

#[test]
fn relation_documents_insert_after_their_endpoints() {
    let engine = engine();
    let report = engine.add(documents("relationship_batch.json")).unwrap();
    assert!(report.all_succeeded(), "outcomes: {:?}", report.outcomes);

    let log = engine.store().insert_log();
    let pos = |needle: &str| {
        log.iter()
            .position(|q| insert_section(q).contains(needle))
            .unwrap_or_else(|| panic!("no insert for {needle}"))
    };
    let rel = "relationship--5f5f5f5f-cccc-4ccc-8ccc-cccccccccccc";
    let sighting = "sighting--6a6a6a6a-dddd-4ddd-8ddd-dddddddddddd";
    let malware = "malware--3d3d3d3d-aaaa-4aaa-8aaa-aaaaaaaaaaaa";
    let identity = "identity--4e4e4e4e-bbbb-4bbb-8bbb-bbbbbbbbbbbb";
    assert!(pos(malware) < pos(rel));
    assert!(pos(identity) < pos(rel));
    assert!(log[pos(rel)].contains(") isa uses"));
    assert!(log[pos(sighting)].contains(") isa sighting"));
}

#[test]
fn deeply_nested_structures_insert_in_one_fragment() {
    let engine = engine();
    let report = engine.add(documents("deep_file.json")).unwrap();
    assert!(report.all_succeeded(), "outcomes: {:?}", report.outcomes);

    let log = engine.store().insert_log();
    let file_query = log
        .iter()
        .find(|q| insert_section(q).contains("file--2c2c2c2c"))
        .unwrap();
    assert!(file_query.contains("isa pe-binary"));
    assert!(file_query.contains("isa pe-section"));
    assert!(file_query.contains("isa pe-sections; "));
    assert!(file_query.contains("isa md5, has hash-value"));
    assert!(file_query.contains("isa sha-256, has hash-value"));
    // The directory reference is matched, not re-created.
    assert!(file_query.starts_with("match "));
    assert!(!insert_section(file_query).contains("directory--1b1b1b1b"));
}

#[test]
fn store_failures_surface_per_document_without_rolling_back() {
    let engine = engine();
    engine.store().fail_inserts_containing(MALWARE_M);
    let report = engine.add(documents("basic_batch.json")).unwrap();

    let failed = report.outcome_for(&id(MALWARE_M)).unwrap();
    assert_eq!(failed.status, OutcomeStatus::Error);
    assert!(failed.error.as_deref().unwrap().contains("injected failure"));

    assert_eq!(report.count(OutcomeStatus::Success), 3);
    assert!(engine.store().contains(&id(IDENTITY_B)));
}

#[test]
fn unsupported_type_is_an_error_outcome() {
    let engine = engine();
    let doc = Document::from_json(json!({
        "type": "campaign",
        "id": "campaign--a1a1a1a1-1111-4111-8111-111111111111",
        "name": "untyped",
    }))
    .unwrap();
    let report = engine.add(vec![doc]).unwrap();
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Error);
    assert!(report.outcomes[0]
        .error
        .as_deref()
        .unwrap()
        .contains("unsupported document type"));
}
