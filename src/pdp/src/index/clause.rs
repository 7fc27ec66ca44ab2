//! Conjunctive clauses

use std::collections::BTreeSet;
use std::fmt;

use super::literal::{Literal, PredicateId};
use crate::error::{PdpError, Result};

/// AND of literals
///
/// Clauses are kept reduced: duplicate literals collapse, `true` literals are
/// dropped, and a clause containing `false` or a literal together with its
/// negation is the constant `false`. The constants are represented by a
/// single constant literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConjunctiveClause {
    literals: BTreeSet<Literal>,
}

impl ConjunctiveClause {
    /// Create a reduced clause
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormula` when no literals are given
    pub fn new<I>(literals: I) -> Result<Self>
    where
        I: IntoIterator<Item = Literal>,
    {
        let literals: BTreeSet<Literal> = literals.into_iter().collect();
        if literals.is_empty() {
            return Err(PdpError::InvalidFormula(
                "a conjunctive clause requires at least one literal".to_string(),
            ));
        }
        Ok(Self::reduce(literals))
    }

    /// Clause of a single literal
    pub fn of(literal: Literal) -> Self {
        Self::reduce(BTreeSet::from([literal]))
    }

    /// Constant clause
    pub fn constant(value: bool) -> Self {
        Self {
            literals: BTreeSet::from([Literal::constant(value)]),
        }
    }

    fn reduce(mut literals: BTreeSet<Literal>) -> Self {
        if literals.iter().any(|l| l.constant_value() == Some(false)) {
            return Self::constant(false);
        }
        literals.retain(|l| l.constant_value().is_none());
        if literals.is_empty() {
            return Self::constant(true);
        }
        let contradictory = literals
            .iter()
            .filter(|l| l.is_negated())
            .any(|l| literals.contains(&l.negate()));
        if contradictory {
            return Self::constant(false);
        }
        Self { literals }
    }

    pub fn is_true(&self) -> bool {
        self.constant_value() == Some(true)
    }

    pub fn is_false(&self) -> bool {
        self.constant_value() == Some(false)
    }

    fn constant_value(&self) -> Option<bool> {
        match self.literals.iter().next() {
            Some(first) if self.literals.len() == 1 => first.constant_value(),
            _ => None,
        }
    }

    pub fn literals(&self) -> impl Iterator<Item = &Literal> {
        self.literals.iter()
    }

    /// Number of literals
    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    /// Predicates referenced by this clause
    pub fn predicates(&self) -> impl Iterator<Item = PredicateId> + '_ {
        self.literals.iter().filter_map(Literal::predicate_id)
    }

    /// Rename predicates. `rename` must be injective, so the clause stays reduced.
    pub fn rename(&self, rename: &dyn Fn(PredicateId) -> PredicateId) -> Self {
        Self {
            literals: self.literals.iter().map(|l| l.rename(rename)).collect(),
        }
    }

    /// AND of two clauses
    pub fn and(&self, other: &ConjunctiveClause) -> Self {
        Self::reduce(self.literals.union(&other.literals).copied().collect())
    }

    /// Whether every assignment satisfying `other` satisfies `self`
    pub fn subsumes(&self, other: &ConjunctiveClause) -> bool {
        self.is_true() || other.is_false() || self.literals.is_subset(&other.literals)
    }

    /// Truth value under a complete predicate assignment
    pub fn evaluate(&self, assignment: &dyn Fn(PredicateId) -> bool) -> bool {
        self.literals.iter().all(|literal| match literal.predicate_id() {
            Some(id) => literal.evaluate(assignment(id)),
            None => literal.evaluate(false),
        })
    }
}

impl fmt::Display for ConjunctiveClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.literals.iter().map(ToString::to_string).collect();
        write!(f, "({})", parts.join(" & "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: u32) -> Literal {
        Literal::predicate(PredicateId(id))
    }

    #[test]
    fn test_empty_clause_rejected() {
        assert!(matches!(
            ConjunctiveClause::new(Vec::new()),
            Err(PdpError::InvalidFormula(_))
        ));
    }

    #[test]
    fn test_contradiction_collapses_to_false() {
        let clause = ConjunctiveClause::new(vec![p(1), p(2), p(1).negate()]).unwrap();
        assert!(clause.is_false());
        assert_eq!(clause, ConjunctiveClause::constant(false));
    }

    #[test]
    fn test_duplicates_and_true_collapse() {
        let clause = ConjunctiveClause::new(vec![p(1), p(1), Literal::constant(true)]).unwrap();
        assert_eq!(clause.len(), 1);
        assert!(!clause.is_true());

        let only_true = ConjunctiveClause::new(vec![Literal::constant(true)]).unwrap();
        assert!(only_true.is_true());
    }

    #[test]
    fn test_and_detects_contradiction() {
        let a = ConjunctiveClause::new(vec![p(1)]).unwrap();
        let b = ConjunctiveClause::new(vec![p(1).negate(), p(2)]).unwrap();
        assert!(a.and(&b).is_false());
    }

    #[test]
    fn test_subsumption() {
        let a = ConjunctiveClause::new(vec![p(1)]).unwrap();
        let ab = ConjunctiveClause::new(vec![p(1), p(2)]).unwrap();
        assert!(a.subsumes(&ab));
        assert!(!ab.subsumes(&a));
        assert!(ConjunctiveClause::constant(true).subsumes(&a));
    }
}
