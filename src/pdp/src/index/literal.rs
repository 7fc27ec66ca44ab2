//! Literals of canonical formulas

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a predicate shared by all documents referencing a structurally
/// identical target predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PredicateId(pub u32);

impl fmt::Display for PredicateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// What a literal refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Atom {
    /// A constant
    Bool(bool),
    /// An opaque predicate evaluated at retrieval time
    Predicate(PredicateId),
}

/// A possibly negated atom. Constants are never stored negated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Literal {
    atom: Atom,
    negated: bool,
}

impl Literal {
    pub fn predicate(id: PredicateId) -> Self {
        Self {
            atom: Atom::Predicate(id),
            negated: false,
        }
    }

    pub fn constant(value: bool) -> Self {
        Self {
            atom: Atom::Bool(value),
            negated: false,
        }
    }

    pub fn atom(&self) -> Atom {
        self.atom
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Predicate referenced by this literal
    pub fn predicate_id(&self) -> Option<PredicateId> {
        match self.atom {
            Atom::Predicate(id) => Some(id),
            Atom::Bool(_) => None,
        }
    }

    /// Value of a constant literal
    pub fn constant_value(&self) -> Option<bool> {
        match self.atom {
            Atom::Bool(value) => Some(value),
            Atom::Predicate(_) => None,
        }
    }

    pub fn negate(&self) -> Self {
        match self.atom {
            Atom::Bool(value) => Self::constant(!value),
            Atom::Predicate(_) => Self {
                atom: self.atom,
                negated: !self.negated,
            },
        }
    }

    /// Same literal over a renamed predicate
    pub fn rename(&self, rename: &dyn Fn(PredicateId) -> PredicateId) -> Self {
        match self.atom {
            Atom::Predicate(id) => Self {
                atom: Atom::Predicate(rename(id)),
                negated: self.negated,
            },
            Atom::Bool(_) => *self,
        }
    }

    /// Whether `self` and `other` can never hold together
    pub fn contradicts(&self, other: &Literal) -> bool {
        self.atom == other.atom && self.negated != other.negated
    }

    /// Truth value given the value of the underlying predicate
    pub fn evaluate(&self, predicate_value: bool) -> bool {
        match self.atom {
            Atom::Bool(value) => value,
            Atom::Predicate(_) => predicate_value != self.negated,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "!")?;
        }
        match self.atom {
            Atom::Bool(value) => write!(f, "{}", value),
            Atom::Predicate(id) => write!(f, "{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negation() {
        let p = Literal::predicate(PredicateId(3));
        assert!(p.negate().is_negated());
        assert_eq!(p.negate().negate(), p);
        assert!(p.contradicts(&p.negate()));
        assert!(!p.contradicts(&p));
    }

    #[test]
    fn test_constants_are_never_negated() {
        let t = Literal::constant(true);
        assert_eq!(t.negate(), Literal::constant(false));
        assert!(!t.negate().is_negated());
    }

    #[test]
    fn test_evaluate() {
        let p = Literal::predicate(PredicateId(0));
        assert!(p.evaluate(true));
        assert!(p.negate().evaluate(false));
        assert!(!p.negate().evaluate(true));
    }
}
