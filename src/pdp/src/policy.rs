//! Document evaluation
//!
//! A matched document is evaluated into a stream of decisions. Body statements
//! are evaluated lazily and in order: a statement is only subscribed once all
//! statements before it hold, and it restarts whenever an earlier statement
//! emits a new value.

use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ast::{Document, Entitlement, Expression, Statement};
use crate::context::EvaluationContext;
use crate::interpreter::{evaluate, evaluate_first};
use crate::stream::{combine_latest, switch_map};
use crate::types::{AuthorizationDecision, Decision};
use crate::value::Val;

/// Stream of decisions for one document
pub type DecisionStream = BoxStream<'static, AuthorizationDecision>;

fn decision(value: AuthorizationDecision) -> DecisionStream {
    futures::stream::once(futures::future::ready(value)).boxed()
}

/// Evaluate the body and constraints of a document
///
/// `ctx` must already carry the subscription variables. The target is not
/// checked here; documents are expected to come out of retrieval.
pub fn evaluate_document(document: &Document, ctx: &EvaluationContext) -> DecisionStream {
    let ctx = ctx.with_imports(&document.imports);
    evaluate_body(Arc::new(document.clone()), 0, ctx)
}

/// Evaluate a target expression once. Attribute finders are rejected.
pub async fn matches_target(target: Option<&Expression>, ctx: &EvaluationContext) -> Val {
    match target {
        None => Val::true_val(),
        Some(expression) => evaluate_first(expression, &ctx.for_target())
            .await
            .require_bool("Target"),
    }
}

fn evaluate_body(document: Arc<Document>, position: usize, ctx: EvaluationContext) -> DecisionStream {
    let Some(statement) = document.body.get(position).cloned() else {
        return evaluate_constraints(document, ctx);
    };

    match statement {
        Statement::Condition(condition) => {
            let values = evaluate(&condition, &ctx);
            switch_map(values, move |value: Val| {
                if let Val::Error(message) = &value {
                    debug!("Condition in '{}' failed: {}", document.name, message);
                    return decision(AuthorizationDecision::indeterminate());
                }
                match value.as_bool() {
                    Some(true) => evaluate_body(Arc::clone(&document), position + 1, ctx.clone()),
                    Some(false) => decision(AuthorizationDecision::not_applicable()),
                    None => {
                        debug!("Condition in '{}' is not boolean: {}", document.name, value);
                        decision(AuthorizationDecision::indeterminate())
                    }
                }
            })
        }
        Statement::ValueDefinition { name, value } => {
            let values = evaluate(&value, &ctx);
            switch_map(values, move |value: Val| {
                if value.is_error() {
                    debug!("Value definition '{}' in '{}' failed: {}", name, document.name, value);
                    return decision(AuthorizationDecision::indeterminate());
                }
                match ctx.with_variable(&name, value) {
                    Ok(scoped) => evaluate_body(Arc::clone(&document), position + 1, scoped),
                    Err(e) => {
                        warn!("Document '{}': {}", document.name, e);
                        decision(AuthorizationDecision::indeterminate())
                    }
                }
            })
        }
    }
}

fn evaluate_constraints(document: Arc<Document>, ctx: EvaluationContext) -> DecisionStream {
    let obligations = evaluate(&Expression::array(document.obligations.clone()), &ctx);
    let advice = evaluate(&Expression::array(document.advice.clone()), &ctx);
    let transformation = match &document.transformation {
        Some(expression) => evaluate(expression, &ctx),
        None => crate::stream::just(Val::Undefined),
    };

    let entitlement = document.entitlement;
    let name = document.name.clone();
    combine_latest(vec![obligations, advice, transformation], move |parts: &[Val]| {
        if let Some(error) = parts.iter().find(|p| p.is_error()) {
            debug!("Constraints of '{}' failed: {}", name, error);
            return AuthorizationDecision::indeterminate();
        }
        let non_empty = |value: &Val| match value.get() {
            Some(Value::Array(items)) if !items.is_empty() => Some(items.clone()),
            _ => None,
        };
        let mut result = AuthorizationDecision::new(match entitlement {
            Entitlement::Permit => Decision::Permit,
            Entitlement::Deny => Decision::Deny,
        });
        result.obligations = non_empty(&parts[0]);
        result.advice = non_empty(&parts[1]);
        result.resource = parts[2].get().cloned();
        result
    })
}
