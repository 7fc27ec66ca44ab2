//! Canonical index snapshot and matcher
//!
//! Every document target is compiled into a [`DisjunctiveFormula`] over shared
//! predicates. The distinct clauses of all documents are flattened into one
//! table where each clause is a pair of bitmasks over predicate positions:
//! which predicates it references and which truth value it requires.
//!
//! Matching walks the predicates in the order chosen by the
//! [`PredicateOrderStrategy`]. A predicate is evaluated only if a live clause
//! of an undetermined document references it, and at most once. Each result
//! eliminates the clauses it violates and satisfies the clauses it
//! completes. Matching stops as soon as every document is matched or
//! eliminated.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::bitmask::Bitmask;
use super::builder::{FormulaBuilder, PredicateTable};
use super::clause::ConjunctiveClause;
use super::formula::DisjunctiveFormula;
use super::literal::PredicateId;
use super::order::{MostReferencedFirst, PredicateOrderStrategy};
use super::update::{PrpUpdateEvent, Update};
use super::{DocumentIndex, PolicyRetrievalResult, PredicateEvaluator};
use crate::ast::Document;
use crate::error::{PdpError, Result};

/// Default limit on the number of clauses per compiled target
pub const DEFAULT_MAX_CLAUSES: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
struct IndexedDocument {
    document: Arc<Document>,
    formula: DisjunctiveFormula,
    compile_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct CompiledClause {
    /// Predicate positions referenced by the clause
    mask: Bitmask,
    /// Required truth value at each referenced position
    polarity: Bitmask,
    literal_count: usize,
    /// Positions of the documents containing the clause
    documents: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct MatchingTables {
    document_names: Vec<String>,
    /// Evaluation order: position -> predicate
    order: Vec<PredicateId>,
    clauses: Vec<CompiledClause>,
    /// Position -> clauses referencing that predicate
    references: Vec<Vec<usize>>,
    clauses_per_document: Vec<usize>,
}

impl MatchingTables {
    fn build(documents: &BTreeMap<String, IndexedDocument>, strategy: &dyn PredicateOrderStrategy) -> Self {
        let mut document_names = Vec::with_capacity(documents.len());
        let mut clauses_per_document = Vec::with_capacity(documents.len());
        let mut clause_ids: HashMap<&ConjunctiveClause, usize> = HashMap::new();
        let mut unique: Vec<(&ConjunctiveClause, Vec<usize>)> = Vec::new();

        for (position, (name, indexed)) in documents.iter().enumerate() {
            document_names.push(name.clone());
            let mut count = 0;
            for clause in indexed.formula.clauses().filter(|c| !c.is_false()) {
                let id = *clause_ids.entry(clause).or_insert_with(|| {
                    unique.push((clause, Vec::new()));
                    unique.len() - 1
                });
                unique[id].1.push(position);
                count += 1;
            }
            clauses_per_document.push(count);
        }

        let mut reference_counts: BTreeMap<PredicateId, usize> = BTreeMap::new();
        for (clause, _) in &unique {
            for id in clause.predicates() {
                *reference_counts.entry(id).or_default() += 1;
            }
        }
        let counts: Vec<(PredicateId, usize)> = reference_counts.into_iter().collect();
        let order = checked_order(strategy, &counts);
        let positions: HashMap<PredicateId, usize> =
            order.iter().enumerate().map(|(position, id)| (*id, position)).collect();

        let mut references = vec![Vec::new(); order.len()];
        let clauses = unique
            .into_iter()
            .enumerate()
            .map(|(index, (clause, documents))| {
                let mut mask = Bitmask::new(order.len());
                let mut polarity = Bitmask::new(order.len());
                for literal in clause.literals() {
                    let Some(position) = literal.predicate_id().and_then(|id| positions.get(&id)) else {
                        continue;
                    };
                    mask.set(*position);
                    if !literal.is_negated() {
                        polarity.set(*position);
                    }
                    references[*position].push(index);
                }
                CompiledClause {
                    literal_count: mask.count(),
                    mask,
                    polarity,
                    documents,
                }
            })
            .collect();

        Self {
            document_names,
            order,
            clauses,
            references,
            clauses_per_document,
        }
    }
}

/// Order proposed by `strategy`, repaired into a permutation of the
/// referenced predicates
///
/// Duplicates and unknown ids are dropped. Referenced predicates the strategy
/// left out are appended in definition order, so no literal goes unchecked.
fn checked_order(strategy: &dyn PredicateOrderStrategy, counts: &[(PredicateId, usize)]) -> Vec<PredicateId> {
    let referenced: BTreeSet<PredicateId> = counts.iter().map(|(id, _)| *id).collect();
    let proposed = strategy.order(counts);
    let proposed_len = proposed.len();

    let mut placed = BTreeSet::new();
    let mut order: Vec<PredicateId> = proposed
        .into_iter()
        .filter(|id| referenced.contains(id) && placed.insert(*id))
        .collect();
    if order.len() != proposed_len {
        warn!(
            "Predicate order strategy {:?} proposed {} duplicate or unknown predicates, ignoring them",
            strategy,
            proposed_len - order.len()
        );
    }
    if order.len() < referenced.len() {
        let missing: Vec<PredicateId> = referenced.difference(&placed).copied().collect();
        warn!(
            "Predicate order strategy {:?} left out {} predicates, appending them in definition order",
            strategy,
            missing.len()
        );
        order.extend(missing);
    }
    order
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentState {
    Undetermined,
    Matched,
    Eliminated,
}

/// Mutable bookkeeping of one matching run
struct MatchState {
    documents: Vec<DocumentState>,
    live_clauses_per_document: Vec<usize>,
    live: Bitmask,
    unsatisfied_literals: Vec<usize>,
    undetermined: usize,
}

impl MatchState {
    fn new(tables: &MatchingTables) -> Self {
        let mut state = Self {
            documents: vec![DocumentState::Undetermined; tables.document_names.len()],
            live_clauses_per_document: tables.clauses_per_document.clone(),
            live: Bitmask::full(tables.clauses.len()),
            unsatisfied_literals: tables.clauses.iter().map(|c| c.literal_count).collect(),
            undetermined: tables.document_names.len(),
        };
        for (document, count) in tables.clauses_per_document.iter().enumerate() {
            if *count == 0 {
                state.determine(document, DocumentState::Eliminated);
            }
        }
        for (index, clause) in tables.clauses.iter().enumerate() {
            if clause.literal_count == 0 {
                state.satisfy(index, clause);
            }
        }
        state
    }

    fn determine(&mut self, document: usize, outcome: DocumentState) {
        if self.documents[document] == DocumentState::Undetermined {
            self.documents[document] = outcome;
            self.undetermined -= 1;
        }
    }

    fn satisfy(&mut self, index: usize, clause: &CompiledClause) {
        self.live.clear(index);
        for document in &clause.documents {
            self.determine(*document, DocumentState::Matched);
        }
    }

    fn eliminate(&mut self, index: usize, clause: &CompiledClause) {
        self.live.clear(index);
        for document in &clause.documents {
            self.live_clauses_per_document[*document] -= 1;
            if self.live_clauses_per_document[*document] == 0 {
                self.determine(*document, DocumentState::Eliminated);
            }
        }
    }

    /// Whether evaluating the predicate at `position` can still change an
    /// outcome
    fn is_relevant(&self, tables: &MatchingTables, position: usize) -> bool {
        tables.references[position].iter().any(|index| {
            self.live.test(*index)
                && tables.clauses[*index]
                    .documents
                    .iter()
                    .any(|d| self.documents[*d] == DocumentState::Undetermined)
        })
    }
}

/// Immutable snapshot of the canonical index
#[derive(Clone)]
pub struct CanonicalIndexSnapshot {
    version: u64,
    consistent: bool,
    max_clauses: usize,
    strategy: Arc<dyn PredicateOrderStrategy>,
    predicates: PredicateTable,
    documents: BTreeMap<String, IndexedDocument>,
    tables: MatchingTables,
}

impl CanonicalIndexSnapshot {
    /// Empty, consistent snapshot at version 0
    pub fn new(max_clauses: usize, strategy: Arc<dyn PredicateOrderStrategy>) -> Self {
        Self {
            version: 0,
            consistent: true,
            max_clauses,
            strategy,
            predicates: PredicateTable::new(),
            documents: BTreeMap::new(),
            tables: MatchingTables::default(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    /// Compiled formula of a document
    pub fn formula(&self, name: &str) -> Option<&DisjunctiveFormula> {
        self.documents.get(name).map(|d| &d.formula)
    }

    /// Compilation error of a document, if its target could not be compiled
    pub fn compile_error(&self, name: &str) -> Option<&str> {
        self.documents.get(name).and_then(|d| d.compile_error.as_deref())
    }

    /// Predicate evaluation order
    pub fn predicate_order(&self) -> &[PredicateId] {
        &self.tables.order
    }

    pub fn predicates(&self) -> &PredicateTable {
        &self.predicates
    }

    /// Number of distinct clauses over all documents
    pub fn clause_count(&self) -> usize {
        self.tables.clauses.len()
    }

    fn compile(&self, document: &Document, predicates: &mut PredicateTable) -> IndexedDocument {
        let built = FormulaBuilder::new(predicates, &document.imports, self.max_clauses)
            .build(document.target.as_ref());
        let (formula, compile_error) = match built {
            Ok(formula) => (formula, None),
            Err(e) => {
                warn!(
                    "Target of document '{}' could not be compiled, treating it as always applicable: {}",
                    document.name, e
                );
                (DisjunctiveFormula::constant(true), Some(e.to_string()))
            }
        };
        trace!("compiled '{}' into {}", document.name, formula);
        IndexedDocument {
            document: Arc::new(document.clone()),
            formula,
            compile_error,
        }
    }

    /// Apply a batch of updates, producing the next snapshot
    ///
    /// Formulas of documents that stay published are reused. Predicates no
    /// longer referenced by any document are dropped from the table and the
    /// remaining ids renumbered. The matching tables are rebuilt once per
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns `FatalUpdate` if a published name is already in use
    pub fn apply_update(&self, event: &PrpUpdateEvent) -> Result<Self> {
        let mut documents = self.documents.clone();
        let mut predicates = self.predicates.clone();
        let mut consistent = self.consistent;

        for update in &event.updates {
            match update {
                Update::Publish(document) => {
                    if documents.contains_key(&document.name) {
                        error!(
                            "Rejected update: document '{}' is already published",
                            document.name
                        );
                        return Err(PdpError::FatalUpdate(format!(
                            "document name collision on publish: '{}'",
                            document.name
                        )));
                    }
                    let indexed = self.compile(document, &mut predicates);
                    documents.insert(document.name.clone(), indexed);
                }
                Update::Withdraw(name) => {
                    if documents.remove(name).is_none() {
                        debug!("Ignored withdrawal of unknown document '{}'", name);
                    }
                }
                Update::MarkConsistent => consistent = true,
                Update::MarkInconsistent => consistent = false,
            }
        }

        let live: BTreeSet<PredicateId> = documents.values().flat_map(|d| d.formula.predicates()).collect();
        if live.len() < predicates.len() {
            let (compacted, renamed) = predicates.compacted(&live);
            debug!(
                "Compacted predicate table from {} to {} predicates",
                predicates.len(),
                compacted.len()
            );
            let rename = |id: PredicateId| renamed.get(&id).copied().unwrap_or(id);
            for indexed in documents.values_mut() {
                indexed.formula = indexed.formula.rename(&rename);
            }
            predicates = compacted;
        }

        let tables = MatchingTables::build(&documents, self.strategy.as_ref());
        info!(
            "Canonical index version {}: {} documents, {} clauses, {} predicates",
            self.version + 1,
            documents.len(),
            tables.clauses.len(),
            tables.order.len()
        );

        Ok(Self {
            version: self.version + 1,
            consistent,
            max_clauses: self.max_clauses,
            strategy: Arc::clone(&self.strategy),
            predicates,
            documents,
            tables,
        })
    }

    /// Match all documents against one subscription
    pub async fn retrieve(&self, evaluator: &dyn PredicateEvaluator) -> PolicyRetrievalResult {
        if !self.consistent {
            debug!("Retrieval on inconsistent snapshot version {}", self.version);
            return PolicyRetrievalResult::inconsistent();
        }

        let tables = &self.tables;
        let mut state = MatchState::new(tables);
        let mut error_occurred = false;

        for (position, id) in tables.order.iter().enumerate() {
            if state.undetermined == 0 {
                break;
            }
            if !state.is_relevant(tables, position) {
                continue;
            }
            let Some(predicate) = self.predicates.get(*id) else {
                continue;
            };

            let outcome = match evaluator.evaluate(&predicate.expression).await {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Predicate {} failed, eliminating dependent clauses: {}", id, e);
                    error_occurred = true;
                    None
                }
            };

            for index in &tables.references[position] {
                if !state.live.test(*index) {
                    continue;
                }
                let clause = &tables.clauses[*index];
                let holds = outcome == Some(clause.polarity.test(position));
                if holds {
                    state.unsatisfied_literals[*index] -= 1;
                    if state.unsatisfied_literals[*index] == 0 {
                        state.satisfy(*index, clause);
                    }
                } else {
                    state.eliminate(*index, clause);
                }
            }
        }

        let mut matching_documents = Vec::new();
        let mut erroneous_documents = Vec::new();
        for (position, outcome) in state.documents.iter().enumerate() {
            if *outcome != DocumentState::Matched {
                continue;
            }
            let name = &tables.document_names[position];
            if let Some(indexed) = self.documents.get(name) {
                if indexed.compile_error.is_some() {
                    error_occurred = true;
                    erroneous_documents.push(name.clone());
                }
                matching_documents.push(Arc::clone(&indexed.document));
            }
        }

        PolicyRetrievalResult {
            matching_documents,
            error_occurred,
            consistent: true,
            erroneous_documents,
        }
    }

    /// Predicates referenced by at least one published document
    pub fn referenced_predicates(&self) -> BTreeSet<PredicateId> {
        self.documents
            .values()
            .flat_map(|d| d.formula.predicates())
            .collect()
    }
}

impl Default for CanonicalIndexSnapshot {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CLAUSES, Arc::new(MostReferencedFirst))
    }
}

impl PartialEq for CanonicalIndexSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.consistent == other.consistent
            && self.max_clauses == other.max_clauses
            && self.predicates == other.predicates
            && self.documents == other.documents
            && self.tables == other.tables
    }
}

impl fmt::Debug for CanonicalIndexSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalIndexSnapshot")
            .field("version", &self.version)
            .field("consistent", &self.consistent)
            .field("documents", &self.documents.keys().collect::<Vec<_>>())
            .field("clauses", &self.tables.clauses.len())
            .field("predicates", &self.tables.order.len())
            .finish()
    }
}

#[async_trait]
impl DocumentIndex for CanonicalIndexSnapshot {
    fn version(&self) -> u64 {
        self.version
    }

    fn is_consistent(&self) -> bool {
        self.consistent
    }

    fn len(&self) -> usize {
        self.documents.len()
    }

    fn document(&self, name: &str) -> Option<Arc<Document>> {
        self.documents.get(name).map(|d| Arc::clone(&d.document))
    }

    fn document_names(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    fn apply_update(&self, event: &PrpUpdateEvent) -> Result<Arc<dyn DocumentIndex>> {
        Ok(Arc::new(CanonicalIndexSnapshot::apply_update(self, event)?))
    }

    async fn retrieve(&self, evaluator: &dyn PredicateEvaluator) -> PolicyRetrievalResult {
        CanonicalIndexSnapshot::retrieve(self, evaluator).await
    }
}
