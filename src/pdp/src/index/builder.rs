//! Compilation of document targets into canonical formulas

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

use super::clause::ConjunctiveClause;
use super::formula::DisjunctiveFormula;
use super::literal::{Literal, PredicateId};
use crate::ast::{BasicExpression, BinaryOperator, Expression, Head, Imports, UnaryOperator};
use crate::error::{PdpError, Result};

/// A predicate known to the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub id: PredicateId,

    /// Import-resolved expression
    pub expression: Expression,
}

/// Interning table of predicates
///
/// Predicates are identified by a blake3 hash of their import-resolved
/// serialized form with object keys sorted, so structurally identical
/// predicates of different documents share one id. Ids are assigned in definition order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateTable {
    by_signature: HashMap<[u8; 32], PredicateId>,
    predicates: Vec<Predicate>,
}

impl PredicateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `expression`, registering it on first sight
    pub fn intern(&mut self, expression: Expression) -> Result<PredicateId> {
        let normalized = sorted_keys(serde_json::to_value(&expression)?);
        let signature = *blake3::hash(&serde_json::to_vec(&normalized)?).as_bytes();
        if let Some(id) = self.by_signature.get(&signature) {
            return Ok(*id);
        }
        let id = PredicateId(u32::try_from(self.predicates.len()).map_err(|_| {
            PdpError::IndexConstruction("too many distinct predicates".to_string())
        })?);
        trace!("new predicate {}: {:?}", id, expression);
        self.by_signature.insert(signature, id);
        self.predicates.push(Predicate { id, expression });
        Ok(id)
    }

    /// Table holding only the `live` predicates, renumbered densely in their
    /// previous relative order, and the mapping from old to new ids
    pub fn compacted(&self, live: &BTreeSet<PredicateId>) -> (Self, HashMap<PredicateId, PredicateId>) {
        let mut renamed = HashMap::with_capacity(live.len());
        let mut predicates = Vec::with_capacity(live.len());
        let mut next = 0u32;
        for predicate in self.predicates.iter().filter(|p| live.contains(&p.id)) {
            let id = PredicateId(next);
            next += 1;
            renamed.insert(predicate.id, id);
            predicates.push(Predicate {
                id,
                expression: predicate.expression.clone(),
            });
        }
        let by_signature = self
            .by_signature
            .iter()
            .filter_map(|(signature, old)| renamed.get(old).map(|new| (*signature, *new)))
            .collect();
        (
            Self {
                by_signature,
                predicates,
            },
            renamed,
        )
    }

    pub fn get(&self, id: PredicateId) -> Option<&Predicate> {
        self.predicates.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Same value with the keys of every nested object in lexicographic order
fn sorted_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(String, Value)> = map.into_iter().map(|(k, v)| (k, sorted_keys(v))).collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(fields.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted_keys).collect()),
        other => other,
    }
}

/// Converts a target expression into disjunctive normal form
pub struct FormulaBuilder<'a> {
    table: &'a mut PredicateTable,
    imports: &'a Imports,
    max_clauses: usize,
}

impl<'a> FormulaBuilder<'a> {
    pub fn new(table: &'a mut PredicateTable, imports: &'a Imports, max_clauses: usize) -> Self {
        Self {
            table,
            imports,
            max_clauses,
        }
    }

    /// Compile a target. A missing target is the constant `true`.
    ///
    /// # Errors
    ///
    /// Returns `IndexConstruction` if the target contains an attribute finder
    /// or normalizes into more than `max_clauses` clauses
    pub fn build(&mut self, target: Option<&Expression>) -> Result<DisjunctiveFormula> {
        let Some(target) = target else {
            return Ok(DisjunctiveFormula::constant(true));
        };
        if target.contains_attribute_finder() {
            return Err(PdpError::IndexConstruction(
                "attribute finders are not allowed in targets".to_string(),
            ));
        }
        self.walk(target)
    }

    fn walk(&mut self, expression: &Expression) -> Result<DisjunctiveFormula> {
        if let Some(value) = expression.as_bool_literal() {
            return Ok(DisjunctiveFormula::constant(value));
        }
        match expression {
            Expression::Binary { op, left, right } => match op {
                BinaryOperator::And | BinaryOperator::EagerAnd => {
                    let left = self.walk(left)?;
                    let right = self.walk(right)?;
                    self.check_product(&left, &right)?;
                    self.bounded(left.and(&right))
                }
                BinaryOperator::Or | BinaryOperator::EagerOr => {
                    let left = self.walk(left)?;
                    let right = self.walk(right)?;
                    self.bounded(left.or(&right))
                }
                _ => self.predicate(expression),
            },
            Expression::Unary {
                op: UnaryOperator::Not,
                operand,
            } => {
                let operand = self.walk(operand)?;
                self.bounded(operand.negate())
            }
            Expression::Basic(BasicExpression {
                head: Head::Group(inner),
                steps,
                tail: None,
            }) if steps.is_empty() => self.walk(inner),
            _ => self.predicate(expression),
        }
    }

    fn predicate(&mut self, expression: &Expression) -> Result<DisjunctiveFormula> {
        let id = self.table.intern(expression.resolve_imports(self.imports))?;
        DisjunctiveFormula::new([ConjunctiveClause::of(Literal::predicate(id))])
    }

    fn check_product(&self, left: &DisjunctiveFormula, right: &DisjunctiveFormula) -> Result<()> {
        if left.len().saturating_mul(right.len()) > self.max_clauses {
            return Err(self.too_large(left.len().saturating_mul(right.len())));
        }
        Ok(())
    }

    fn bounded(&self, formula: DisjunctiveFormula) -> Result<DisjunctiveFormula> {
        if formula.len() > self.max_clauses {
            return Err(self.too_large(formula.len()));
        }
        Ok(formula)
    }

    fn too_large(&self, clauses: usize) -> PdpError {
        PdpError::IndexConstruction(format!(
            "target normalizes into {} clauses, limit is {}",
            clauses, self.max_clauses
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Step;
    use serde_json::json;

    fn cmp(field: &str, value: &str) -> Expression {
        Expression::equals(Expression::identifier("subject").key(field), Expression::value(value))
    }

    fn build(target: &Expression) -> (Result<DisjunctiveFormula>, PredicateTable) {
        let mut table = PredicateTable::new();
        let imports = Imports::new();
        let formula = FormulaBuilder::new(&mut table, &imports, 64).build(Some(target));
        (formula, table)
    }

    #[test]
    fn test_missing_target_is_true() {
        let mut table = PredicateTable::new();
        let imports = Imports::new();
        let formula = FormulaBuilder::new(&mut table, &imports, 8).build(None).unwrap();
        assert!(formula.is_true());
    }

    #[test]
    fn test_identical_predicates_share_id() {
        let target = Expression::or(
            Expression::and(cmp("role", "admin"), cmp("dept", "it")),
            Expression::and(cmp("role", "admin"), cmp("dept", "hr")),
        );
        let (formula, table) = build(&target);
        assert_eq!(table.len(), 3);
        assert_eq!(formula.unwrap().len(), 2);
    }

    #[test]
    fn test_imports_normalize_predicates() {
        let mut table = PredicateTable::new();
        let mut imports = Imports::new();
        imports.insert("length".to_string(), "standard.length".to_string());

        let short = Expression::function("length", vec![Expression::identifier("resource")]);
        let long = Expression::function("standard.length", vec![Expression::identifier("resource")]);
        let a = FormulaBuilder::new(&mut table, &imports, 8).build(Some(&short)).unwrap();
        let b = FormulaBuilder::new(&mut table, &Imports::new(), 8).build(Some(&long)).unwrap();

        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_literal_key_order_does_not_split_predicates() {
        let meta = |value: serde_json::Value| {
            Expression::equals(Expression::identifier("subject").key("meta"), Expression::value(value))
        };
        let mut table = PredicateTable::new();
        let a = table.intern(meta(json!({"a": 1, "b": {"x": 1, "y": 2}}))).unwrap();
        let b = table.intern(meta(json!({"b": {"y": 2, "x": 1}, "a": 1}))).unwrap();
        let c = table.intern(meta(json!({"a": 1, "b": {"x": 1, "y": 3}}))).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_compacted_keeps_live_predicates_in_order() {
        let mut table = PredicateTable::new();
        let a = table.intern(cmp("a", "1")).unwrap();
        let b = table.intern(cmp("b", "1")).unwrap();
        let c = table.intern(cmp("c", "1")).unwrap();

        let (compacted, renamed) = table.compacted(&BTreeSet::from([a, c]));
        assert_eq!(compacted.len(), 2);
        assert_eq!(renamed.get(&a), Some(&PredicateId(0)));
        assert_eq!(renamed.get(&c), Some(&PredicateId(1)));
        assert!(!renamed.contains_key(&b));
        assert_eq!(compacted.get(PredicateId(1)).unwrap().expression, cmp("c", "1"));

        // interning continues after the surviving ids
        let mut compacted = compacted;
        assert_eq!(compacted.intern(cmp("c", "1")).unwrap(), PredicateId(1));
        assert_eq!(compacted.intern(cmp("b", "1")).unwrap(), PredicateId(2));
    }

    #[test]
    fn test_negation_pushed_to_leaves() {
        let target = Expression::not(Expression::group(Expression::or(
            cmp("a", "1"),
            cmp("b", "2"),
        )));
        let (formula, _) = build(&target);
        let formula = formula.unwrap();
        assert_eq!(formula.len(), 1);
        let clause = formula.clauses().next().unwrap();
        assert!(clause.literals().all(Literal::is_negated));
    }

    #[test]
    fn test_contradiction_matches_nothing() {
        let target = Expression::and(cmp("a", "1"), Expression::not(cmp("a", "1")));
        let (formula, _) = build(&target);
        assert!(formula.unwrap().is_false());
    }

    #[test]
    fn test_attribute_finder_rejected() {
        let target = Expression::identifier("subject").step(Step::AttributeFinder {
            name: "user.profile".to_string(),
            arguments: vec![],
            head: false,
        });
        let (formula, _) = build(&target);
        assert!(matches!(formula, Err(PdpError::IndexConstruction(_))));
    }

    #[test]
    fn test_clause_limit() {
        // (a1 | b1) & (a2 | b2) & ... expands to 2^n clauses
        let mut target = Expression::or(cmp("a0", "x"), cmp("b0", "x"));
        for i in 1..8 {
            target = Expression::and(
                target,
                Expression::or(cmp(&format!("a{}", i), "x"), cmp(&format!("b{}", i), "x")),
            );
        }
        let (formula, _) = build(&target);
        assert!(matches!(formula, Err(PdpError::IndexConstruction(_))));
    }
}
