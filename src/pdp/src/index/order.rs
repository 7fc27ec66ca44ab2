//! Predicate evaluation order strategies

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt::Debug;
use std::sync::Arc;

use super::literal::PredicateId;

/// Decides the order in which the matcher evaluates predicates
pub trait PredicateOrderStrategy: Send + Sync + Debug {
    /// Order predicates given the number of live clauses referencing each
    fn order(&self, references: &[(PredicateId, usize)]) -> Vec<PredicateId>;
}

/// Most referenced predicates first, ties broken by definition order
#[derive(Debug, Clone, Copy, Default)]
pub struct MostReferencedFirst;

impl PredicateOrderStrategy for MostReferencedFirst {
    fn order(&self, references: &[(PredicateId, usize)]) -> Vec<PredicateId> {
        let mut sorted = references.to_vec();
        sorted.sort_by_key(|(id, count)| (Reverse(*count), *id));
        sorted.into_iter().map(|(id, _)| id).collect()
    }
}

/// Definition order
#[derive(Debug, Clone, Copy, Default)]
pub struct DefinitionOrder;

impl PredicateOrderStrategy for DefinitionOrder {
    fn order(&self, references: &[(PredicateId, usize)]) -> Vec<PredicateId> {
        let mut ids: Vec<PredicateId> = references.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids
    }
}

/// Configurable choice of strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOrder {
    #[default]
    MostReferenced,
    Definition,
}

impl PredicateOrder {
    pub fn strategy(self) -> Arc<dyn PredicateOrderStrategy> {
        match self {
            PredicateOrder::MostReferenced => Arc::new(MostReferencedFirst),
            PredicateOrder::Definition => Arc::new(DefinitionOrder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_referenced_first() {
        let references = [(PredicateId(0), 1), (PredicateId(1), 3), (PredicateId(2), 3)];
        assert_eq!(
            MostReferencedFirst.order(&references),
            vec![PredicateId(1), PredicateId(2), PredicateId(0)]
        );
    }

    #[test]
    fn test_definition_order() {
        let references = [(PredicateId(2), 1), (PredicateId(0), 3)];
        assert_eq!(
            DefinitionOrder.order(&references),
            vec![PredicateId(0), PredicateId(2)]
        );
    }
}
