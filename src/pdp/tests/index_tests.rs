//! Document index tests
//!
//! The canonical index must select exactly the documents the naive index
//! selects, while evaluating every shared predicate at most once.

use async_trait::async_trait;
use cretoai_pdp::{
    ast::{BinaryOperator, Document, Entitlement, Expression},
    context::EvaluationContext,
    error::PdpError,
    index::{
        create_index, CanonicalIndexSnapshot, DocumentIndex, IndexKind, NaiveIndexSnapshot, PredicateEvaluator,
        PredicateOrder, PrpUpdateEvent, TargetEvaluator,
    },
    types::AuthorizationSubscription,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Records how often each predicate was evaluated
struct CountingEvaluator {
    inner: TargetEvaluator,
    counts: Mutex<HashMap<String, usize>>,
}

impl CountingEvaluator {
    fn new(ctx: &EvaluationContext) -> Self {
        Self {
            inner: TargetEvaluator::new(ctx),
            counts: Mutex::new(HashMap::new()),
        }
    }

    fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }

    fn max_per_predicate(&self) -> usize {
        self.counts.lock().values().copied().max().unwrap_or(0)
    }
}

#[async_trait]
impl PredicateEvaluator for CountingEvaluator {
    async fn evaluate(&self, predicate: &Expression) -> Result<bool, PdpError> {
        let key = serde_json::to_string(predicate)?;
        *self.counts.lock().entry(key).or_insert(0) += 1;
        self.inner.evaluate(predicate).await
    }
}

fn flag(i: usize) -> Expression {
    Expression::identifier("subject").key(&format!("p{}", i))
}

fn subject_context(flags: &[bool]) -> EvaluationContext {
    let subject: Map<String, Value> = flags
        .iter()
        .enumerate()
        .map(|(i, f)| (format!("p{}", i), Value::Bool(*f)))
        .collect();
    EvaluationContext::with_standard_library()
        .for_subscription(&AuthorizationSubscription::new(Value::Object(subject), "read", "doc"))
}

fn publish_all(targets: &[Expression]) -> PrpUpdateEvent {
    targets
        .iter()
        .enumerate()
        .fold(PrpUpdateEvent::new(), |event, (i, target)| {
            event.publish(Document::new(format!("doc{}", i), Entitlement::Permit).with_target(target.clone()))
        })
}

// ============================================================================
// SHARED PREDICATE EVALUATION
// ============================================================================

#[tokio::test]
async fn test_shared_predicate_evaluated_once() {
    let targets = vec![
        Expression::and(flag(0), flag(1)),
        Expression::and(flag(0), Expression::not(flag(2))),
        Expression::or(flag(0), flag(1)),
        flag(0),
    ];
    let index = CanonicalIndexSnapshot::default().apply_update(&publish_all(&targets)).unwrap();

    let evaluator = CountingEvaluator::new(&subject_context(&[true, false, false]));
    let result = index.retrieve(&evaluator).await;

    assert_eq!(result.document_names(), vec!["doc1", "doc2", "doc3"]);
    assert!(result.is_authoritative());
    assert_eq!(evaluator.max_per_predicate(), 1);
    assert!(evaluator.total() <= 3);
}

#[tokio::test]
async fn test_irrelevant_predicates_skipped() {
    // once p0 is false, no live clause references p1 or p2
    let targets = vec![
        Expression::and(flag(0), flag(1)),
        Expression::and(flag(0), flag(2)),
    ];
    let index = CanonicalIndexSnapshot::new(64, PredicateOrder::MostReferenced.strategy())
        .apply_update(&publish_all(&targets))
        .unwrap();

    let evaluator = CountingEvaluator::new(&subject_context(&[false, true, true]));
    let result = index.retrieve(&evaluator).await;

    assert!(result.matching_documents.is_empty());
    assert_eq!(evaluator.total(), 1);
}

#[tokio::test]
async fn test_predicate_error_only_eliminates_dependent_clauses() {
    // subject.missing is undefined, which is not a boolean
    let broken = Expression::identifier("subject").key("missing");
    let targets = vec![
        Expression::or(broken.clone(), flag(0)),
        Expression::and(broken, flag(0)),
        flag(0),
    ];

    for kind in [IndexKind::Canonical, IndexKind::Naive] {
        let index = create_index(kind, PredicateOrder::Definition, 64)
            .apply_update(&publish_all(&targets))
            .unwrap();
        let result = index.retrieve(&TargetEvaluator::new(&subject_context(&[true]))).await;

        assert!(result.error_occurred, "{:?}", kind);
        assert!(!result.is_authoritative());
        let names = result.document_names();
        assert!(names.contains(&"doc2"), "{:?}", kind);
        assert!(!names.contains(&"doc1"), "{:?}", kind);
    }
}

#[tokio::test]
async fn test_equal_predicates_with_different_imports_share_one_slot() {
    let short = Document::new("short", Entitlement::Permit)
        .with_import("hasRole", "auth.hasRole")
        .with_target(Expression::function(
            "hasRole",
            vec![Expression::identifier("subject"), Expression::value("admin")],
        ));
    let qualified = Document::new("qualified", Entitlement::Deny).with_target(Expression::function(
        "auth.hasRole",
        vec![Expression::identifier("subject"), Expression::value("admin")],
    ));
    let index = CanonicalIndexSnapshot::default()
        .apply_update(&PrpUpdateEvent::new().publish(short).publish(qualified))
        .unwrap();
    assert_eq!(index.predicates().len(), 1);

    let ctx = EvaluationContext::with_standard_library().for_subscription(&AuthorizationSubscription::new(
        json!({"roles": ["admin"]}),
        "read",
        "doc",
    ));
    let evaluator = CountingEvaluator::new(&ctx);
    let result = index.retrieve(&evaluator).await;
    assert_eq!(result.document_names(), vec!["qualified", "short"]);
    assert_eq!(evaluator.total(), 1);
}

#[tokio::test]
async fn test_withdraw_then_republish() {
    let index = create_index(IndexKind::Canonical, PredicateOrder::default(), 64);
    let index = index
        .apply_update(&PrpUpdateEvent::new().publish(Document::new("a", Entitlement::Permit).with_target(flag(0))))
        .unwrap();
    let index = index.apply_update(&PrpUpdateEvent::new().withdraw("a")).unwrap();
    assert!(index.is_empty());

    let index = index
        .apply_update(&PrpUpdateEvent::new().publish(Document::new("a", Entitlement::Deny)))
        .unwrap();
    assert_eq!(index.version(), 3);
    assert_eq!(index.document_names(), vec!["a".to_string()]);
}

// ============================================================================
// PROPERTY-BASED TESTS (PROPTEST)
// ============================================================================

const FLAGS: usize = 3;

fn target_strategy() -> impl Strategy<Value = Expression> {
    let leaf = prop_oneof![
        4 => (0..FLAGS).prop_map(flag),
        1 => any::<bool>().prop_map(|b| Expression::value(b)),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expression::and(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expression::or(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expression::binary(BinaryOperator::EagerAnd, l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expression::binary(BinaryOperator::EagerOr, l, r)),
            inner.prop_map(Expression::not),
        ]
    })
}

proptest! {
    #[test]
    fn test_canonical_matches_naive(
        targets in prop::collection::vec(target_strategy(), 1..8),
        flags in prop::collection::vec(any::<bool>(), FLAGS),
        most_referenced in any::<bool>(),
    ) {
        tokio_test::block_on(async {
            let order = if most_referenced { PredicateOrder::MostReferenced } else { PredicateOrder::Definition };
            let event = publish_all(&targets);
            let canonical = CanonicalIndexSnapshot::new(1024, order.strategy()).apply_update(&event).unwrap();
            let naive = NaiveIndexSnapshot::new().apply_update(&event).unwrap();

            let ctx = subject_context(&flags);
            let counting = CountingEvaluator::new(&ctx);
            let from_canonical = canonical.retrieve(&counting).await;
            let from_naive = naive.retrieve(&TargetEvaluator::new(&ctx)).await;

            let mut canonical_names = from_canonical.document_names();
            let mut naive_names = from_naive.document_names();
            canonical_names.sort_unstable();
            naive_names.sort_unstable();

            assert_eq!(canonical_names, naive_names, "targets: {:?}, flags: {:?}", targets, flags);
            assert!(!from_canonical.error_occurred);
            assert!(counting.max_per_predicate() <= 1);
            assert!(counting.total() <= FLAGS);
        });
    }
}
