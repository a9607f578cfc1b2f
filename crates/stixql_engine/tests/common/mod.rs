#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use stixql_core::{DocId, Document};
use stixql_engine::{Engine, EngineConfig};
use stixql_schema::{SchemaConfig, SchemaRegistry};
use stixql_store::MemoryStore;

pub fn testdata(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../testdata")
        .join(path)
}

pub fn registry() -> Arc<SchemaRegistry> {
    let src = fs::read_to_string(testdata("schema.json")).unwrap();
    Arc::new(
        SchemaConfig::from_json_str(&src)
            .unwrap()
            .into_registry()
            .unwrap(),
    )
}

pub fn documents(name: &str) -> Vec<Document> {
    let src = fs::read_to_string(testdata(&format!("documents/{name}"))).unwrap();
    let values: Vec<serde_json::Value> = serde_json::from_str(&src).unwrap();
    values
        .into_iter()
        .map(|v| Document::from_json(v).unwrap())
        .collect()
}

pub fn engine() -> Engine<MemoryStore> {
    Engine::new(registry(), MemoryStore::new(), EngineConfig::default())
}

pub fn id(raw: &str) -> DocId {
    raw.parse().unwrap()
}

/// The insert section of a combined query, for asserting what a transaction
/// actually creates.
pub fn insert_section(query: &str) -> &str {
    query
        .split_once("insert ")
        .map(|(_, tail)| tail)
        .unwrap_or(query)
}
