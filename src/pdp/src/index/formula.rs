//! Disjunctive normal form formulas

use std::collections::BTreeSet;
use std::fmt;

use super::clause::ConjunctiveClause;
use super::literal::PredicateId;
use crate::error::{PdpError, Result};

/// OR of conjunctive clauses
///
/// Formulas are kept reduced: `false` clauses are dropped unless nothing else
/// remains, and clauses subsumed by a weaker clause are absorbed. Equality is
/// therefore independent of clause order and duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisjunctiveFormula {
    clauses: BTreeSet<ConjunctiveClause>,
}

impl DisjunctiveFormula {
    /// Create a reduced formula
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormula` when no clauses are given
    pub fn new<I>(clauses: I) -> Result<Self>
    where
        I: IntoIterator<Item = ConjunctiveClause>,
    {
        let clauses: BTreeSet<ConjunctiveClause> = clauses.into_iter().collect();
        if clauses.is_empty() {
            return Err(PdpError::InvalidFormula(
                "a disjunctive formula requires at least one clause".to_string(),
            ));
        }
        Ok(Self::reduce(clauses))
    }

    /// Constant formula
    pub fn constant(value: bool) -> Self {
        Self {
            clauses: BTreeSet::from([ConjunctiveClause::constant(value)]),
        }
    }

    fn reduce(clauses: BTreeSet<ConjunctiveClause>) -> Self {
        if clauses.iter().any(ConjunctiveClause::is_true) {
            return Self::constant(true);
        }
        let candidates: Vec<ConjunctiveClause> =
            clauses.into_iter().filter(|c| !c.is_false()).collect();
        if candidates.is_empty() {
            return Self::constant(false);
        }
        let kept = candidates
            .iter()
            .enumerate()
            .filter(|(i, clause)| {
                !candidates
                    .iter()
                    .enumerate()
                    .any(|(j, other)| *i != j && other.subsumes(clause))
            })
            .map(|(_, clause)| clause.clone())
            .collect();
        Self { clauses: kept }
    }

    pub fn is_true(&self) -> bool {
        self.clauses.len() == 1 && self.clauses.iter().all(ConjunctiveClause::is_true)
    }

    pub fn is_false(&self) -> bool {
        self.clauses.len() == 1 && self.clauses.iter().all(ConjunctiveClause::is_false)
    }

    pub fn clauses(&self) -> impl Iterator<Item = &ConjunctiveClause> {
        self.clauses.iter()
    }

    /// Number of clauses
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Distinct predicates referenced by this formula
    pub fn predicates(&self) -> BTreeSet<PredicateId> {
        self.clauses.iter().flat_map(ConjunctiveClause::predicates).collect()
    }

    /// Rename predicates. `rename` must be injective, so the formula stays reduced.
    pub fn rename(&self, rename: &dyn Fn(PredicateId) -> PredicateId) -> Self {
        Self {
            clauses: self.clauses.iter().map(|c| c.rename(rename)).collect(),
        }
    }

    /// AND of two formulas, distributing over the clauses
    pub fn and(&self, other: &DisjunctiveFormula) -> Self {
        let mut clauses = BTreeSet::new();
        for left in &self.clauses {
            for right in &other.clauses {
                clauses.insert(left.and(right));
            }
        }
        Self::reduce(clauses)
    }

    /// OR of two formulas
    pub fn or(&self, other: &DisjunctiveFormula) -> Self {
        Self::reduce(self.clauses.union(&other.clauses).cloned().collect())
    }

    /// Negation by De Morgan's laws
    pub fn negate(&self) -> Self {
        self.clauses
            .iter()
            .map(|clause| {
                Self::reduce(
                    clause
                        .literals()
                        .map(|literal| ConjunctiveClause::of(literal.negate()))
                        .collect(),
                )
            })
            .reduce(|acc, next| acc.and(&next))
            .unwrap_or_else(|| Self::constant(true))
    }

    /// Truth value under a complete predicate assignment
    pub fn evaluate(&self, assignment: &dyn Fn(PredicateId) -> bool) -> bool {
        self.clauses.iter().any(|clause| clause.evaluate(assignment))
    }
}

impl fmt::Display for DisjunctiveFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.clauses.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(" | "))
    }
}
