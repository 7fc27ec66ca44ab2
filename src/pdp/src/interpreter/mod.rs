//! Streaming expression evaluator
//!
//! [`evaluate`] turns an expression into a stream of value snapshots. Composite
//! values subscribe to all of their operands and recombine on every change
//! once all operands have produced a value. Steps, filters and subtemplates
//! switch to the latest upstream value, cancelling work for stale ones.

pub mod filter;
pub mod operators;
pub mod steps;

use futures::StreamExt;

use crate::ast::{BasicExpression, BinaryOperator, Expression, Head, Step, Tail};
use crate::context::EvaluationContext;
use crate::stream::{self, combine_latest, first_value, just, switch_map, ValStream};
use crate::value::{collect_array, collect_object, Val};

const NO_RELATIVE_NODE: &str = "Relative expression error. No relative node.";

/// Evaluate an expression into a stream of values
pub fn evaluate(expression: &Expression, ctx: &EvaluationContext) -> ValStream {
    match expression {
        Expression::Basic(basic) => evaluate_basic(basic, ctx),
        Expression::Unary { op, operand } => {
            let op = *op;
            evaluate(operand, ctx)
                .map(move |value| operators::unary(op, value))
                .boxed()
        }
        Expression::Binary { op, left, right } => match op {
            BinaryOperator::And => lazy(*op, left, right, ctx, false),
            BinaryOperator::Or => lazy(*op, left, right, ctx, true),
            _ => {
                let op = *op;
                combine_latest(vec![evaluate(left, ctx), evaluate(right, ctx)], move |v: &[Val]| {
                    operators::binary(op, &v[0], &v[1])
                })
            }
        },
    }
}

/// Evaluate to the first emitted value
pub async fn evaluate_first(expression: &Expression, ctx: &EvaluationContext) -> Val {
    first_value(evaluate(expression, ctx))
        .next()
        .await
        .unwrap_or(Val::Undefined)
}

/// Lazy `&&` / `||`: the right operand is only subscribed while the left one
/// does not decide the result on its own.
fn lazy(
    op: BinaryOperator,
    left: &Expression,
    right: &Expression,
    ctx: &EvaluationContext,
    short_circuit_on: bool,
) -> ValStream {
    let right = right.clone();
    let ctx_right = ctx.clone();
    switch_map(evaluate(left, ctx), move |left_value: Val| {
        if left_value.is_error() {
            return just(left_value);
        }
        match left_value.as_bool() {
            Some(b) if b == short_circuit_on => just(Val::from(b)),
            Some(_) => evaluate(&right, &ctx_right)
                .map(move |right_value| operators::binary(op, &left_value, &right_value))
                .boxed(),
            None => just(Val::error(format!(
                "Type mismatch. Boolean operation expects boolean values, but got: '{}'.",
                left_value
            ))),
        }
    })
}

fn evaluate_basic(basic: &BasicExpression, ctx: &EvaluationContext) -> ValStream {
    let head = evaluate_head(&basic.head, ctx);
    resolve_steps_and_tail(head, &basic.steps, basic.tail.as_ref(), ctx)
}

fn evaluate_head(head: &Head, ctx: &EvaluationContext) -> ValStream {
    match head {
        Head::Group(expression) => evaluate(expression, ctx),
        Head::Value(value) => just(Val::of(value.clone())),
        Head::Undefined => just(Val::Undefined),
        Head::Array(items) => {
            if items.is_empty() {
                return just(Val::empty_array());
            }
            combine_latest(
                items.iter().map(|item| evaluate(item, ctx)).collect(),
                |values: &[Val]| collect_array(values.iter().cloned()),
            )
        }
        Head::Object(fields) => {
            if fields.is_empty() {
                return just(Val::empty_object());
            }
            let keys: Vec<String> = fields.iter().map(|(k, _)| k.clone()).collect();
            combine_latest(
                fields.iter().map(|(_, v)| evaluate(v, ctx)).collect(),
                move |values: &[Val]| collect_object(keys.iter().cloned().zip(values.iter().cloned())),
            )
        }
        Head::Function { name, arguments } => {
            let name = ctx.resolve(name);
            let ctx = ctx.clone();
            let argument_streams = arguments.iter().map(|a| evaluate(a, &ctx)).collect();
            combine_latest(argument_streams, move |values: &[Val]| {
                ctx.functions().evaluate(&name, values)
            })
        }
        Head::Identifier(name) => just(ctx.variable(name)),
        Head::Relative => match ctx.relative_node() {
            Val::Undefined => stream::error(NO_RELATIVE_NODE),
            node => just(node.clone()),
        },
    }
}

/// Apply steps, then the filter or subtemplate, each switching to the latest
/// upstream value
fn resolve_steps_and_tail(
    source: ValStream,
    path: &[Step],
    tail: Option<&Tail>,
    ctx: &EvaluationContext,
) -> ValStream {
    let mut current = source;
    for step in path {
        let step = step.clone();
        let ctx = ctx.clone();
        current = switch_map(current, move |value: Val| steps::apply(&step, value, &ctx));
    }

    match tail {
        None => current,
        Some(Tail::Filter(component)) => {
            let component = component.clone();
            let ctx = ctx.clone();
            switch_map(current, move |value: Val| {
                filter::apply(&component, value.clone(), &ctx.with_relative_node(value))
            })
        }
        Some(Tail::Subtemplate(template)) => {
            let template = (**template).clone();
            let ctx = ctx.clone();
            switch_map(current, move |value: Val| apply_subtemplate(&template, value, &ctx))
        }
    }
}

fn apply_subtemplate(template: &Expression, value: Val, ctx: &EvaluationContext) -> ValStream {
    if value.is_error() {
        return just(value);
    }
    match value.as_array() {
        Some(items) if items.is_empty() => just(Val::empty_array()),
        Some(items) => recombine_array(
            items
                .iter()
                .map(|item| evaluate(template, &ctx.with_relative_node(Val::of(item.clone()))))
                .collect(),
        ),
        None => evaluate(template, &ctx.with_relative_node(value)),
    }
}

/// Recombine element streams into an array stream
pub(crate) fn recombine_array(elements: Vec<ValStream>) -> ValStream {
    if elements.is_empty() {
        return just(Val::empty_array());
    }
    combine_latest(elements, |values: &[Val]| collect_array(values.iter().cloned()))
}

/// Recombine field streams into an object stream, keeping field order
pub(crate) fn recombine_object(fields: Vec<(String, ValStream)>) -> ValStream {
    if fields.is_empty() {
        return just(Val::empty_object());
    }
    let (keys, streams): (Vec<String>, Vec<ValStream>) = fields.into_iter().unzip();
    combine_latest(streams, move |values: &[Val]| {
        collect_object(keys.iter().cloned().zip(values.iter().cloned()))
    })
}
