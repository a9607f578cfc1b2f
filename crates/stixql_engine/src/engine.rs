use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, warn};

use stixql_compile::{plan_delete, Decoder, DeletePlan, DeleteStep, Encoder};
use stixql_core::{DocId, Document};
use stixql_dag::{schedule, Component, DepGraph};
use stixql_schema::SchemaRegistry;
use stixql_store::GraphStore;

use crate::error::EngineError;
use crate::instruction::{Instruction, Status};
use crate::options::EngineConfig;
use crate::report::{BatchReport, Outcome};
use crate::resolver::ReferenceResolver;

/// Batch pipeline over one store backend: insert (`add`), delete, and read
/// (`fetch`). Per-document failures are recorded in the returned
/// [`BatchReport`]; only faults outside any single document's transaction
/// surface as [`EngineError`].
pub struct Engine<S: GraphStore> {
    registry: Arc<SchemaRegistry>,
    store: S,
    config: EngineConfig,
    resolver: Option<Box<dyn ReferenceResolver>>,
}

impl<S: GraphStore> Engine<S> {
    pub fn new(registry: Arc<SchemaRegistry>, store: S, config: EngineConfig) -> Self {
        Engine {
            registry,
            store,
            config,
            resolver: None,
        }
    }

    /// Install a resolver consulted once per identity a batch references but
    /// does not contain.
    pub fn with_resolver(mut self, resolver: Box<dyn ReferenceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &SchemaRegistry {
        self.registry.as_ref()
    }

    /// Insert a batch. Documents may arrive in any order and may reference
    /// each other forwards, backwards or cyclically; each gets exactly one
    /// outcome in the report.
    pub fn add(&self, docs: Vec<Document>) -> Result<BatchReport, EngineError> {
        let mut report = BatchReport::begin(self.store.store_name(), self.registry.config_hash());
        let encoder = Encoder::new(self.registry.as_ref())
            .with_sanitize(self.config.sanitize)
            .with_strict_failure(self.config.strict_failure);

        let mut instructions: BTreeMap<DocId, Instruction> = BTreeMap::new();
        let mut order: Vec<DocId> = Vec::new();
        let mut graph = DepGraph::new();
        let mut next_index = 0usize;

        // Enqueue loop: submitted documents first, then anything the
        // reference resolver supplies for identities still external to the
        // batch. Each resolver id is consulted exactly once.
        let mut pending = docs;
        let mut resolver_seen: BTreeSet<DocId> = BTreeSet::new();
        while !pending.is_empty() {
            for doc in std::mem::take(&mut pending) {
                if instructions.contains_key(&doc.id) {
                    warn!(id = %doc.id, "duplicate identity in batch; keeping the first");
                    continue;
                }
                let mut instruction = Instruction::new(doc.id.clone(), next_index);
                graph.ensure_batch_node(doc.id.clone(), next_index);
                next_index += 1;
                match encoder.encode(&doc) {
                    Ok(fragment) => {
                        for dep in &fragment.dep_list {
                            graph.ensure_ref_node(dep.clone());
                            graph.add_dependency(dep.clone(), doc.id.clone());
                        }
                        instruction.fragment = Some(fragment);
                    }
                    Err(e) => instruction.fail(Status::Error, e.to_string()),
                }
                order.push(doc.id.clone());
                instructions.insert(doc.id.clone(), instruction);
            }
            if let Some(resolver) = &self.resolver {
                for ext in graph.external_ids() {
                    if instructions.contains_key(&ext) || !resolver_seen.insert(ext.clone()) {
                        continue;
                    }
                    if let Some(doc) = resolver.resolve(&ext) {
                        debug!(id = %ext, "reference resolver supplied a document");
                        pending.push(doc);
                    }
                }
            }
        }

        // References in neither the batch nor the database fail their direct
        // dependents, each with the exact missing subset.
        let external: Vec<DocId> = graph.external_ids().into_iter().collect();
        let stored_external = self.existing(&external)?;
        let missing: BTreeSet<DocId> = external
            .into_iter()
            .filter(|id| !stored_external.contains(id))
            .collect();
        if !missing.is_empty() {
            for instruction in instructions.values_mut() {
                if instruction.status != Status::Created {
                    continue;
                }
                let Some(fragment) = &instruction.fragment else {
                    continue;
                };
                let miss: Vec<DocId> = fragment.dep_list.intersection(&missing).cloned().collect();
                if !miss.is_empty() {
                    let listed: Vec<String> = miss.iter().map(ToString::to_string).collect();
                    instruction.missing = miss;
                    instruction.fail(
                        Status::FailedMissingDependency,
                        format!("missing dependencies: {}", listed.join(", ")),
                    );
                }
            }
        }

        // Already-stored batch identities are excluded before scheduling.
        let candidates: Vec<DocId> = instructions
            .values()
            .filter(|i| i.status == Status::Created)
            .map(|i| i.id.clone())
            .collect();
        for id in self.existing(&candidates)? {
            if let Some(instruction) = instructions.get_mut(&id) {
                instruction.status = Status::ExcludeExistsInDatabase;
            }
        }

        let live: BTreeSet<DocId> = instructions
            .values()
            .filter(|i| i.status == Status::Created)
            .map(|i| i.id.clone())
            .collect();
        let plan = schedule(&graph, &live)?;
        debug!(components = plan.components.len(), "batch scheduled");

        for component in &plan.components {
            if component.cyclic {
                self.run_cycle(component, &mut instructions);
            } else {
                for id in &component.members {
                    self.run_single(id, &mut instructions);
                }
            }
        }

        let outcomes = order
            .iter()
            .filter_map(|id| instructions.get(id))
            .map(Outcome::from_instruction)
            .collect();
        report.complete(outcomes);
        Ok(report)
    }

    /// Delete a batch. Dependents are deleted before their dependencies
    /// (reversed reference order); reference relations go with the deleted
    /// document, pointed players survive.
    pub fn delete(&self, docs: Vec<Document>) -> Result<BatchReport, EngineError> {
        let mut report = BatchReport::begin(self.store.store_name(), self.registry.config_hash());

        let mut instructions: BTreeMap<DocId, Instruction> = BTreeMap::new();
        let mut plans: BTreeMap<DocId, DeletePlan> = BTreeMap::new();
        let mut order: Vec<DocId> = Vec::new();
        let mut graph = DepGraph::new();

        for (index, doc) in docs.into_iter().enumerate() {
            if instructions.contains_key(&doc.id) {
                warn!(id = %doc.id, "duplicate identity in batch; keeping the first");
                continue;
            }
            let mut instruction = Instruction::new(doc.id.clone(), index);
            graph.ensure_batch_node(doc.id.clone(), index);
            match plan_delete(&doc, self.registry.as_ref()) {
                Ok(plan) => {
                    plans.insert(doc.id.clone(), plan);
                }
                Err(e) => instruction.fail(Status::Error, e.to_string()),
            }
            order.push(doc.id.clone());
            instructions.insert(doc.id.clone(), instruction);
        }

        // Reversed edges: a document referencing another must be deleted
        // first, so it plays the scheduler's "dependency" role.
        for (id, plan) in &plans {
            for dep in &plan.dep_list {
                if plans.contains_key(dep) {
                    graph.add_dependency(id.clone(), dep.clone());
                }
            }
        }

        // Identities absent from the store have nothing to delete.
        let candidates: Vec<DocId> = instructions
            .values()
            .filter(|i| i.status == Status::Created)
            .map(|i| i.id.clone())
            .collect();
        let stored = self.existing(&candidates)?;
        for instruction in instructions.values_mut() {
            if instruction.status == Status::Created && !stored.contains(&instruction.id) {
                instruction.fail(Status::Error, "identity not present in the database");
            }
        }

        let live: BTreeSet<DocId> = instructions
            .values()
            .filter(|i| i.status == Status::Created)
            .map(|i| i.id.clone())
            .collect();
        let sched = schedule(&graph, &live)?;

        // A deletion cycle needs no phase split: each document's own plan
        // removes its reference relations before any entity dies.
        for id in sched.flat_order() {
            let Some(instruction) = instructions.get_mut(&id) else {
                continue;
            };
            let Some(plan) = plans.get(&id) else {
                continue;
            };
            let queries: Vec<String> = plan.steps.iter().map(DeleteStep::query).collect();
            instruction.status = Status::CreatedQuery;
            match self.store.execute_delete(&queries) {
                Ok(()) => instruction.status = Status::Success,
                Err(e) => instruction.fail(Status::Error, e.to_string()),
            }
        }

        let outcomes = order
            .iter()
            .filter_map(|id| instructions.get(id))
            .map(Outcome::from_instruction)
            .collect();
        report.complete(outcomes);
        Ok(report)
    }

    /// Read one stored object graph back as a document.
    pub fn fetch(&self, id: &DocId) -> Result<Option<Document>, EngineError> {
        match self.store.fetch(id)? {
            Some(tree) => Ok(Some(Decoder::new(self.registry.as_ref()).decode(&tree)?)),
            None => Ok(None),
        }
    }

    /// Batched existence check, `existence_batch` identities per query.
    fn existing(&self, ids: &[DocId]) -> Result<BTreeSet<DocId>, EngineError> {
        let mut stored = BTreeSet::new();
        for chunk in ids.chunks(self.config.existence_batch.max(1)) {
            stored.extend(self.store.existing_ids(chunk)?);
        }
        Ok(stored)
    }

    fn run_single(&self, id: &DocId, instructions: &mut BTreeMap<DocId, Instruction>) {
        let Some(instruction) = instructions.get_mut(id) else {
            return;
        };
        let Some(fragment) = &instruction.fragment else {
            return;
        };
        let Some(query) = fragment.combined_query() else {
            // Nothing to insert is a valid fragment, not a failure.
            instruction.status = Status::Success;
            return;
        };
        instruction.query = Some(query.clone());
        instruction.status = Status::CreatedQuery;
        match self.store.execute_insert(std::slice::from_ref(&query)) {
            Ok(()) => instruction.status = Status::Success,
            Err(e) => instruction.fail(Status::Error, format!("{e}; query: {query}")),
        }
    }

    /// Two-phase insert of a contracted cycle: every member's identity and
    /// scalar attributes first, every member's cross-references second. Each
    /// phase is one transaction per member.
    fn run_cycle(&self, component: &Component, instructions: &mut BTreeMap<DocId, Instruction>) {
        let splittable = component.members.iter().all(|id| {
            instructions
                .get(id)
                .and_then(|i| i.fragment.as_ref())
                .map(|f| f.phase_splittable)
                .unwrap_or(false)
        });
        if !splittable {
            for id in &component.members {
                if let Some(instruction) = instructions.get_mut(id) {
                    if instruction.status == Status::Created {
                        instruction.fail(
                            Status::FailedCyclical,
                            "reference cycle contains a document that cannot stand alone",
                        );
                    }
                }
            }
            return;
        }

        for id in &component.members {
            let Some(instruction) = instructions.get_mut(id) else {
                continue;
            };
            let Some(fragment) = &instruction.fragment else {
                continue;
            };
            let phase_one = fragment.phase_one_query();
            instruction.phase_two = fragment.phase_two_query();
            instruction.query = phase_one.clone();
            instruction.status = Status::CreatedQuery;
            if let Some(query) = phase_one {
                if let Err(e) = self.store.execute_insert(std::slice::from_ref(&query)) {
                    instruction.fail(Status::Error, format!("{e}; query: {query}"));
                }
            }
        }
        for id in &component.members {
            let Some(instruction) = instructions.get_mut(id) else {
                continue;
            };
            if instruction.status != Status::CreatedQuery {
                continue;
            }
            match instruction.phase_two.clone() {
                Some(query) => match self.store.execute_insert(std::slice::from_ref(&query)) {
                    Ok(()) => instruction.status = Status::Success,
                    Err(e) => instruction.fail(Status::Error, format!("{e}; query: {query}")),
                },
                None => instruction.status = Status::Success,
            }
        }
    }
}
