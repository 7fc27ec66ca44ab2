//! Naive index: evaluates every document target on its own

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::update::{PrpUpdateEvent, Update};
use super::{DocumentIndex, PolicyRetrievalResult, PredicateEvaluator};
use crate::ast::Document;
use crate::error::{PdpError, Result};

/// Immutable snapshot of the naive index
#[derive(Debug, Clone, PartialEq)]
pub struct NaiveIndexSnapshot {
    version: u64,
    consistent: bool,
    documents: BTreeMap<String, Arc<Document>>,
}

impl NaiveIndexSnapshot {
    /// Empty, consistent snapshot at version 0
    pub fn new() -> Self {
        Self {
            version: 0,
            consistent: true,
            documents: BTreeMap::new(),
        }
    }

    /// Apply a batch of updates, producing the next snapshot
    ///
    /// # Errors
    ///
    /// Returns `FatalUpdate` if a published name is already in use
    pub fn apply_update(&self, event: &PrpUpdateEvent) -> Result<Self> {
        let mut documents = self.documents.clone();
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
                    documents.insert(document.name.clone(), Arc::new(document.clone()));
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

        info!("Naive index version {}: {} documents", self.version + 1, documents.len());
        Ok(Self {
            version: self.version + 1,
            consistent,
            documents,
        })
    }

    /// Evaluate every target
    pub async fn retrieve(&self, evaluator: &dyn PredicateEvaluator) -> PolicyRetrievalResult {
        if !self.consistent {
            return PolicyRetrievalResult::inconsistent();
        }

        let mut result = PolicyRetrievalResult {
            matching_documents: Vec::new(),
            error_occurred: false,
            consistent: true,
            erroneous_documents: Vec::new(),
        };
        for document in self.documents.values() {
            let Some(target) = &document.target else {
                result.matching_documents.push(Arc::clone(document));
                continue;
            };
            match evaluator.evaluate(&target.resolve_imports(&document.imports)).await {
                Ok(true) => result.matching_documents.push(Arc::clone(document)),
                Ok(false) => {}
                Err(e) => {
                    warn!("Target of document '{}' failed: {}", document.name, e);
                    result.error_occurred = true;
                }
            }
        }
        result
    }
}

impl Default for NaiveIndexSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentIndex for NaiveIndexSnapshot {
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
        self.documents.get(name).cloned()
    }

    fn document_names(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    fn apply_update(&self, event: &PrpUpdateEvent) -> Result<Arc<dyn DocumentIndex>> {
        Ok(Arc::new(NaiveIndexSnapshot::apply_update(self, event)?))
    }

    async fn retrieve(&self, evaluator: &dyn PredicateEvaluator) -> PolicyRetrievalResult {
        NaiveIndexSnapshot::retrieve(self, evaluator).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Entitlement, Expression};
    use crate::context::EvaluationContext;
    use crate::index::TargetEvaluator;
    use crate::types::AuthorizationSubscription;
    use serde_json::json;

    #[tokio::test]
    async fn test_naive_retrieval() {
        let event = PrpUpdateEvent::new()
            .publish(Document::new("read", Entitlement::Permit).with_target(Expression::equals(
                Expression::identifier("action"),
                Expression::value("read"),
            )))
            .publish(Document::new("write", Entitlement::Permit).with_target(Expression::equals(
                Expression::identifier("action"),
                Expression::value("write"),
            )))
            .publish(Document::new("broken", Entitlement::Deny).with_target(Expression::identifier("action")));
        let index = NaiveIndexSnapshot::new().apply_update(&event).unwrap();

        let ctx = EvaluationContext::with_standard_library()
            .for_subscription(&AuthorizationSubscription::new("alice", "read", "doc"));
        let result = index.retrieve(&TargetEvaluator::new(&ctx)).await;

        assert_eq!(result.document_names(), vec!["read"]);
        assert!(result.error_occurred);
    }

    #[test]
    fn test_duplicate_publish_rejected() {
        let index = NaiveIndexSnapshot::new()
            .apply_update(&PrpUpdateEvent::new().publish(Document::new("a", Entitlement::Permit)))
            .unwrap();
        let result = index.apply_update(&PrpUpdateEvent::new().publish(Document::new("a", Entitlement::Deny)));
        assert!(matches!(result, Err(PdpError::FatalUpdate(_))));
    }
}
