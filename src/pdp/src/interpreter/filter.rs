//! Filter application (`value |- ...`)

use std::sync::Arc;
use tracing::trace;

use super::{evaluate, steps};
use crate::ast::{Expression, FilterComponent};
use crate::context::EvaluationContext;
use crate::stream::{self, combine_latest, just, switch_map, ValStream};
use crate::value::{collect_array, Val, FILTERS_CANNOT_BE_APPLIED_TO_UNDEFINED_VALUES};

/// Apply a filter component to a value
///
/// Extended filters run their statements as a pipeline: each statement sees
/// the latest output of the previous one and restarts whenever it changes.
pub fn apply(filter: &FilterComponent, value: Val, ctx: &EvaluationContext) -> ValStream {
    if value.is_error() {
        return just(value);
    }
    if value.is_undefined() {
        return stream::error(FILTERS_CANNOT_BE_APPLIED_TO_UNDEFINED_VALUES);
    }

    match filter {
        FilterComponent::Simple {
            function,
            arguments,
            each,
        } => apply_filter_function(value, function, arguments, *each, ctx),
        FilterComponent::Extended(statements) => {
            let mut pipeline = just(value);
            for statement in statements {
                let statement = Arc::new(statement.clone());
                let ctx = ctx.clone();
                pipeline = switch_map(pipeline, move |current: Val| {
                    if current.is_error() {
                        return just(current);
                    }
                    steps::apply_filter_statement(current, 0, &statement, &ctx)
                });
            }
            pipeline
        }
    }
}

/// Run the filter function on `value`, or on each of its elements
///
/// The filtered value is passed as first argument, followed by the evaluated
/// `arguments`. Results of `each` are recombined into an array, so a function
/// returning `Undefined` removes the element.
pub fn apply_filter_function(
    value: Val,
    function: &str,
    arguments: &[Expression],
    each: bool,
    ctx: &EvaluationContext,
) -> ValStream {
    if value.is_error() {
        return just(value);
    }
    if value.is_undefined() {
        return stream::error(FILTERS_CANNOT_BE_APPLIED_TO_UNDEFINED_VALUES);
    }
    if each && !value.is_array() {
        return stream::error(format!(
            "Type mismatch. Filtering each element requires an array, but got: '{}'.",
            value
        ));
    }

    let name = ctx.resolve(function);
    trace!("apply filter function {} (each: {}) to: {}", name, each, value);
    let argument_streams = arguments.iter().map(|a| evaluate(a, ctx)).collect();
    let ctx = ctx.clone();
    combine_latest(argument_streams, move |arguments: &[Val]| {
        if let Some(error) = arguments.iter().find(|a| a.is_error()) {
            return error.clone();
        }
        match value.as_array() {
            Some(items) if each => collect_array(
                items
                    .iter()
                    .map(|item| call(&ctx, &name, Val::of(item.clone()), arguments)),
            ),
            _ => call(&ctx, &name, value.clone(), arguments),
        }
    })
}

fn call(ctx: &EvaluationContext, name: &str, value: Val, arguments: &[Val]) -> Val {
    let mut all = Vec::with_capacity(arguments.len() + 1);
    all.push(value);
    all.extend_from_slice(arguments);
    ctx.functions().evaluate(name, &all)
}
