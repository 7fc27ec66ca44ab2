//! Retrieval benchmarks
//!
//! Compares the canonical index against evaluating every target on its own,
//! for document sets whose targets share most of their predicates.

use cretoai_pdp::{
    ast::{Document, Entitlement, Expression},
    context::EvaluationContext,
    index::{create_index, DocumentIndex, IndexKind, PredicateOrder, PrpUpdateEvent, TargetEvaluator},
    types::AuthorizationSubscription,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

const ACTIONS: [&str; 4] = ["read", "write", "delete", "share"];

fn create_test_documents(count: usize) -> PrpUpdateEvent {
    (0..count).fold(PrpUpdateEvent::new(), |event, i| {
        let action = Expression::equals(Expression::identifier("action"), Expression::value(ACTIONS[i % 4]));
        let department = Expression::equals(
            Expression::identifier("subject").key("department"),
            Expression::value(format!("dept-{}", i % 10)),
        );
        let kind = Expression::equals(
            Expression::identifier("resource").key("kind"),
            Expression::value(format!("kind-{}", i % 25)),
        );
        let target = Expression::and(action, Expression::or(department, kind));
        event.publish(Document::new(format!("policy-{}", i), Entitlement::Permit).with_target(target))
    })
}

fn build_index(kind: IndexKind, count: usize) -> Arc<dyn DocumentIndex> {
    create_index(kind, PredicateOrder::MostReferenced, 1024)
        .apply_update(&create_test_documents(count))
        .unwrap()
}

fn bench_retrieval(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let ctx = EvaluationContext::with_standard_library().for_subscription(&AuthorizationSubscription::new(
        json!({"name": "alice", "department": "dept-3"}),
        "read",
        json!({"kind": "kind-7"}),
    ));
    let evaluator = TargetEvaluator::new(&ctx);

    let mut group = c.benchmark_group("retrieval");

    for count in [10, 100, 1000].iter() {
        for kind in [IndexKind::Canonical, IndexKind::Naive] {
            let index = build_index(kind, *count);
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", kind).to_lowercase(), count),
                count,
                |b, _| {
                    b.to_async(&rt).iter(|| async {
                        let result = index.retrieve(black_box(&evaluator)).await;
                        black_box(result);
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");

    for count in [10, 100, 1000].iter() {
        let event = create_test_documents(*count);
        group.bench_with_input(BenchmarkId::new("publish", count), count, |b, _| {
            b.iter(|| {
                let index = create_index(IndexKind::Canonical, PredicateOrder::MostReferenced, 1024);
                black_box(index.apply_update(black_box(&event)).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_retrieval, bench_update);
criterion_main!(benches);
