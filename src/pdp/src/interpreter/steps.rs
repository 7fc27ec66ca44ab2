//! Path step application
//!
//! `apply` selects from a parent value. `apply_filter_statement` rebuilds the
//! parent, rewriting only what the remaining target path of a filter statement
//! selects. A step that does not fit the shape of its parent selects nothing:
//! single-selection steps yield `Undefined`, multi-selection steps an empty
//! array, and filter statements leave the parent untouched.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::trace;

use super::{evaluate, filter, recombine_array, recombine_object};
use crate::ast::{Expression, FilterStatement, Step};
use crate::context::EvaluationContext;
use crate::stream::{self, combine_latest, first_value, just, switch_map, ValStream};
use crate::value::Val;

const ATTRIBUTES_NOT_ALLOWED_IN_TARGET: &str =
    "Attribute resolution error. Attributes not allowed in target.";
const UNDEFINED_HANDED_TO_ATTRIBUTE_FINDER: &str =
    "Undefined value handed over as parameter to policy information point";
const ATTRIBUTE_FINDER_IN_FILTER: &str =
    "AttributeFinderStep not permitted in filter selection steps.";

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Indices selected by `[from:to:step]` on an array of length `len`
pub fn slice_indices(len: usize, from: Option<i64>, to: Option<i64>, step: Option<i64>) -> Result<Vec<usize>, Val> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Val::error("Step must not be zero."));
    }
    let len = len as i64;
    let normalize = |i: i64| if i < 0 { i + len } else { i };

    let mut indices = Vec::new();
    if step > 0 {
        let from = normalize(from.unwrap_or(0)).clamp(0, len);
        let to = normalize(to.unwrap_or(len)).clamp(0, len);
        let mut i = from;
        while i < to {
            indices.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let from = normalize(from.unwrap_or(len - 1)).clamp(-1, len - 1);
        let to = to.map(normalize).unwrap_or(-1).clamp(-1, len - 1);
        let mut i = from;
        while i > to {
            indices.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    Ok(indices)
}

fn recursive_key(key: &str, node: &Value, results: &mut Vec<Value>) {
    match node {
        Value::Array(items) => {
            for item in items {
                recursive_key(key, item, results);
            }
        }
        Value::Object(fields) => {
            if let Some(value) = fields.get(key) {
                results.push(value.clone());
            }
            for value in fields.values() {
                recursive_key(key, value, results);
            }
        }
        _ => {}
    }
}

fn recursive_index(index: i64, node: &Value, results: &mut Vec<Value>) {
    match node {
        Value::Array(items) => {
            if let Some(i) = normalize_index(index, items.len()) {
                results.push(items[i].clone());
            }
            for item in items {
                recursive_index(index, item, results);
            }
        }
        Value::Object(fields) => {
            for value in fields.values() {
                recursive_index(index, value, results);
            }
        }
        _ => {}
    }
}

/// Apply a step to a parent value
pub fn apply(step: &Step, parent: Val, ctx: &EvaluationContext) -> ValStream {
    if parent.is_error() {
        return just(parent);
    }
    match step {
        Step::Key(key) => {
            let selected = parent
                .as_object()
                .and_then(|object| object.get(key))
                .map(|value| Val::of(value.clone()));
            just(selected.unwrap_or(Val::Undefined))
        }
        Step::Index(index) => {
            let selected = parent
                .as_array()
                .and_then(|items| normalize_index(*index, items.len()).map(|i| Val::of(items[i].clone())));
            just(selected.unwrap_or(Val::Undefined))
        }
        Step::Wildcard => match parent.get() {
            Some(Value::Array(_)) => just(parent),
            Some(Value::Object(fields)) => just(Val::of(Value::Array(fields.values().cloned().collect()))),
            _ => just(Val::empty_array()),
        },
        Step::Slice { from, to, step } => match parent.as_array() {
            Some(items) => match slice_indices(items.len(), *from, *to, *step) {
                Ok(indices) => just(Val::of(Value::Array(
                    indices.into_iter().map(|i| items[i].clone()).collect(),
                ))),
                Err(e) => just(e),
            },
            None => just(Val::empty_array()),
        },
        Step::RecursiveKey(key) => {
            let mut results = Vec::new();
            if let Some(node) = parent.get() {
                recursive_key(key, node, &mut results);
            }
            just(Val::of(Value::Array(results)))
        }
        Step::RecursiveIndex(index) => {
            let mut results = Vec::new();
            if let Some(node) = parent.get() {
                recursive_index(*index, node, &mut results);
            }
            just(Val::of(Value::Array(results)))
        }
        Step::Condition(condition) => apply_condition(condition, parent, ctx),
        Step::AttributeFinder {
            name,
            arguments,
            head,
        } => apply_attribute_finder(name, arguments, *head, parent, ctx),
    }
}

fn condition_mismatch(value: &Val) -> Val {
    Val::error(format!(
        "Type mismatch. Condition step expects a boolean value, but got: '{}'.",
        value
    ))
}

fn apply_condition(condition: &Expression, parent: Val, ctx: &EvaluationContext) -> ValStream {
    let candidates: Vec<Value> = match parent.get() {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Object(fields)) => fields.values().cloned().collect(),
        _ => return just(Val::empty_array()),
    };
    if candidates.is_empty() {
        return just(Val::empty_array());
    }

    let checks = candidates
        .iter()
        .map(|candidate| evaluate(condition, &ctx.with_relative_node(Val::of(candidate.clone()))))
        .collect();

    combine_latest(checks, move |results: &[Val]| {
        let mut selected = Vec::new();
        for (candidate, result) in candidates.iter().zip(results) {
            match result {
                Val::Error(_) => return result.clone(),
                _ => match result.as_bool() {
                    Some(true) => selected.push(candidate.clone()),
                    Some(false) => {}
                    None => return condition_mismatch(result),
                },
            }
        }
        Val::of(Value::Array(selected))
    })
}

fn apply_attribute_finder(
    name: &str,
    arguments: &[Expression],
    head: bool,
    parent: Val,
    ctx: &EvaluationContext,
) -> ValStream {
    if ctx.in_target() {
        return stream::error(ATTRIBUTES_NOT_ALLOWED_IN_TARGET);
    }
    if parent.is_undefined() {
        return stream::error(UNDEFINED_HANDED_TO_ATTRIBUTE_FINDER);
    }

    let name = ctx.resolve(name);
    trace!("subscribe to attribute {} of {}", name, parent);
    let argument_values = combine_latest(
        arguments.iter().map(|a| evaluate(a, ctx)).collect(),
        |values: &[Val]| values.to_vec(),
    );
    let ctx = ctx.clone();
    let values = switch_map(argument_values, move |arguments: Vec<Val>| {
        if let Some(error) = arguments.iter().find(|a| a.is_error()) {
            return just(error.clone());
        }
        ctx.attributes()
            .evaluate_attribute(&name, parent.clone(), arguments, ctx.variables())
    });

    if head {
        first_value(values)
    } else {
        values
    }
}

/// Rebuild `parent`, applying the filter statement to what its target path
/// selects from step `depth` onwards
pub fn apply_filter_statement(
    parent: Val,
    depth: usize,
    statement: &Arc<FilterStatement>,
    ctx: &EvaluationContext,
) -> ValStream {
    let Some(step) = statement.target.get(depth) else {
        let ctx = ctx.with_relative_node(parent.clone());
        return filter::apply_filter_function(parent, &statement.function, &statement.arguments, statement.each, &ctx);
    };
    if parent.is_error() {
        return just(parent);
    }
    trace!("apply filter step {:?} at depth {} to: {}", step, depth, parent);

    match step {
        Step::Key(key) => match parent.as_object() {
            Some(object) => recombine_object(
                object
                    .iter()
                    .map(|(k, v)| {
                        let field = if k == key {
                            select(v, depth, statement, &parent, ctx)
                        } else {
                            just(Val::of(v.clone()))
                        };
                        (k.clone(), field)
                    })
                    .collect(),
            ),
            None => just(parent),
        },
        Step::Index(index) => match parent.as_array() {
            Some(items) => {
                let selected = normalize_index(*index, items.len());
                rebuild_array(items, &parent, depth, statement, ctx, |i| Some(i) == selected)
            }
            None => just(parent),
        },
        Step::Wildcard => match parent.get() {
            Some(Value::Array(items)) => rebuild_array(items, &parent, depth, statement, ctx, |_| true),
            Some(Value::Object(fields)) => recombine_object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), select(v, depth, statement, &parent, ctx)))
                    .collect(),
            ),
            _ => just(parent),
        },
        Step::Slice { from, to, step } => match parent.as_array() {
            Some(items) => match slice_indices(items.len(), *from, *to, *step) {
                Ok(indices) => rebuild_array(items, &parent, depth, statement, ctx, |i| indices.contains(&i)),
                Err(e) => just(e),
            },
            None => just(parent),
        },
        Step::RecursiveKey(key) => recursive_key_filter(key, parent, depth, statement, ctx),
        Step::RecursiveIndex(index) => recursive_index_filter(*index, parent, depth, statement, ctx),
        Step::Condition(condition) => condition_filter(condition, parent, depth, statement, ctx),
        Step::AttributeFinder { .. } => stream::error(ATTRIBUTE_FINDER_IN_FILTER),
    }
}

/// Continue with the next target step, or run the filter function when the
/// path is fully matched. `container` becomes the relative node.
fn select(
    value: &Value,
    depth: usize,
    statement: &Arc<FilterStatement>,
    container: &Val,
    ctx: &EvaluationContext,
) -> ValStream {
    if depth + 1 == statement.target.len() {
        filter::apply_filter_function(
            Val::of(value.clone()),
            &statement.function,
            &statement.arguments,
            statement.each,
            &ctx.with_relative_node(container.clone()),
        )
    } else {
        apply_filter_statement(Val::of(value.clone()), depth + 1, statement, ctx)
    }
}

fn rebuild_array(
    items: &[Value],
    container: &Val,
    depth: usize,
    statement: &Arc<FilterStatement>,
    ctx: &EvaluationContext,
    selected: impl Fn(usize) -> bool,
) -> ValStream {
    recombine_array(
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                if selected(i) {
                    select(item, depth, statement, container, ctx)
                } else {
                    just(Val::of(item.clone()))
                }
            })
            .collect(),
    )
}

fn recurse_into_object(
    object: &Map<String, Value>,
    recurse: impl Fn(Val) -> ValStream,
) -> ValStream {
    recombine_object(
        object
            .iter()
            .map(|(k, v)| (k.clone(), recurse(Val::of(v.clone()))))
            .collect(),
    )
}

fn recursive_key_filter(
    key: &str,
    parent: Val,
    depth: usize,
    statement: &Arc<FilterStatement>,
    ctx: &EvaluationContext,
) -> ValStream {
    match parent.get() {
        Some(Value::Object(object)) => recombine_object(
            object
                .iter()
                .map(|(k, v)| {
                    let field = if k == key {
                        select(v, depth, statement, &parent, ctx)
                    } else {
                        recursive_key_filter(key, Val::of(v.clone()), depth, statement, ctx)
                    };
                    (k.clone(), field)
                })
                .collect(),
        ),
        Some(Value::Array(items)) => recombine_array(
            items
                .iter()
                .map(|item| recursive_key_filter(key, Val::of(item.clone()), depth, statement, ctx))
                .collect(),
        ),
        _ => just(parent),
    }
}

fn recursive_index_filter(
    index: i64,
    parent: Val,
    depth: usize,
    statement: &Arc<FilterStatement>,
    ctx: &EvaluationContext,
) -> ValStream {
    match parent.get() {
        Some(Value::Object(object)) => recurse_into_object(object, |value| {
            recursive_index_filter(index, value, depth, statement, ctx)
        }),
        Some(Value::Array(items)) => {
            let selected = normalize_index(index, items.len());
            recombine_array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        if Some(i) == selected {
                            select(item, depth, statement, &parent, ctx)
                        } else {
                            recursive_index_filter(index, Val::of(item.clone()), depth, statement, ctx)
                        }
                    })
                    .collect(),
            )
        }
        _ => just(parent),
    }
}

fn condition_filter(
    condition: &Expression,
    parent: Val,
    depth: usize,
    statement: &Arc<FilterStatement>,
    ctx: &EvaluationContext,
) -> ValStream {
    let filter_candidate = |value: &Value| -> ValStream {
        let check = evaluate(condition, &ctx.with_relative_node(Val::of(value.clone())));
        let value = value.clone();
        let container = parent.clone();
        let statement = Arc::clone(statement);
        let ctx = ctx.clone();
        switch_map(check, move |result: Val| {
            if result.is_error() {
                return just(result);
            }
            match result.as_bool() {
                Some(true) => select(&value, depth, &statement, &container, &ctx),
                Some(false) => just(Val::of(value.clone())),
                None => just(condition_mismatch(&result)),
            }
        })
    };

    match parent.get() {
        Some(Value::Array(items)) => recombine_array(items.iter().map(filter_candidate).collect()),
        Some(Value::Object(object)) => recombine_object(
            object
                .iter()
                .map(|(k, v)| (k.clone(), filter_candidate(v)))
                .collect(),
        ),
        _ => just(parent.clone()),
    }
}
