//! Document indexes
//!
//! An index is an immutable, versioned snapshot of the published documents.
//! Updates never mutate a snapshot: [`DocumentIndex::apply_update`] returns a
//! new one, so readers always see either the old or the new document set.

pub mod bitmask;
pub mod builder;
pub mod canonical;
pub mod clause;
pub mod formula;
pub mod literal;
pub mod naive;
pub mod order;
pub mod update;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

use crate::ast::{Document, Expression};
use crate::context::EvaluationContext;
use crate::error::{PdpError, Result};
use crate::interpreter::evaluate_first;
use crate::value::Val;

pub use canonical::CanonicalIndexSnapshot;
pub use naive::NaiveIndexSnapshot;
pub use order::{PredicateOrder, PredicateOrderStrategy};
pub use update::{PrpUpdateEvent, Update};

/// Outcome of matching a subscription against an index
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRetrievalResult {
    /// Documents whose target holds, in name order
    pub matching_documents: Vec<Arc<Document>>,

    /// A predicate failed to evaluate, or a selected document could not be
    /// compiled. The result must not be used to authorize on its own.
    pub error_occurred: bool,

    /// False while the document source is mid-update
    pub consistent: bool,

    /// Selected documents whose target could not be compiled
    pub erroneous_documents: Vec<String>,
}

impl PolicyRetrievalResult {
    /// Result for a snapshot marked inconsistent
    pub fn inconsistent() -> Self {
        Self {
            matching_documents: Vec::new(),
            error_occurred: false,
            consistent: false,
            erroneous_documents: Vec::new(),
        }
    }

    /// Whether a decision may be based on this result alone
    pub fn is_authoritative(&self) -> bool {
        self.consistent && !self.error_occurred
    }

    /// Names of the matching documents
    pub fn document_names(&self) -> Vec<&str> {
        self.matching_documents.iter().map(|d| d.name.as_str()).collect()
    }
}

/// Evaluates target predicates for one subscription
#[async_trait]
pub trait PredicateEvaluator: Send + Sync {
    /// Evaluate an import-resolved predicate to a boolean
    ///
    /// # Errors
    ///
    /// Returns `PredicateEvaluation` if the predicate does not evaluate to a
    /// boolean value
    async fn evaluate(&self, predicate: &Expression) -> Result<bool>;
}

/// Evaluates predicates with the interpreter, taking the first value
#[derive(Debug, Clone)]
pub struct TargetEvaluator {
    ctx: EvaluationContext,
}

impl TargetEvaluator {
    /// `ctx` must carry the subscription variables
    pub fn new(ctx: &EvaluationContext) -> Self {
        Self {
            ctx: ctx.for_target(),
        }
    }
}

#[async_trait]
impl PredicateEvaluator for TargetEvaluator {
    async fn evaluate(&self, predicate: &Expression) -> Result<bool> {
        match evaluate_first(predicate, &self.ctx).await {
            Val::Defined(Value::Bool(b)) => Ok(b),
            Val::Error(message) => Err(PdpError::PredicateEvaluation(message)),
            other => Err(PdpError::PredicateEvaluation(format!(
                "Type mismatch. Target must evaluate to a boolean value, but was: {}",
                other
            ))),
        }
    }
}

/// Immutable document index snapshot
#[async_trait]
pub trait DocumentIndex: Send + Sync + Debug {
    /// Version, incremented by every applied update batch
    fn version(&self) -> u64;

    fn is_consistent(&self) -> bool;

    /// Number of published documents
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn document(&self, name: &str) -> Option<Arc<Document>>;

    /// Names of all published documents in name order
    fn document_names(&self) -> Vec<String>;

    /// Apply a batch of updates, producing the next snapshot
    ///
    /// # Errors
    ///
    /// Returns `FatalUpdate` if the batch publishes a name that is already in
    /// use. Nothing of the batch is applied in that case.
    fn apply_update(&self, event: &PrpUpdateEvent) -> Result<Arc<dyn DocumentIndex>>;

    /// Match all documents against one subscription
    async fn retrieve(&self, evaluator: &dyn PredicateEvaluator) -> PolicyRetrievalResult;
}

/// Which index implementation to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    Canonical,
    Naive,
}

/// Create an empty index
pub fn create_index(kind: IndexKind, predicate_order: PredicateOrder, max_clauses: usize) -> Arc<dyn DocumentIndex> {
    match kind {
        IndexKind::Canonical => Arc::new(CanonicalIndexSnapshot::new(max_clauses, predicate_order.strategy())),
        IndexKind::Naive => Arc::new(NaiveIndexSnapshot::new()),
    }
}
