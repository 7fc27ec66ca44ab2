//! Operator semantics over single values
//!
//! All functions here are total: type errors are returned as `Val::Error`.
//! Error operands are absorbing, the left operand's error wins.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::ast::{BinaryOperator, UnaryOperator};
use crate::value::Val;

/// Upper bound of cached patterns; the cache is cleared when it is reached
const REGEX_CACHE_CAPACITY: usize = 256;

static REGEX_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Compile `pattern` as a full-match regular expression, reusing earlier compilations
fn compiled_regex(pattern: &str) -> Result<Regex, regex::Error> {
    if let Some(regex) = REGEX_CACHE.lock().get(pattern) {
        return Ok(regex.clone());
    }
    let regex = Regex::new(&format!("^(?:{})$", pattern))?;
    let mut cache = REGEX_CACHE.lock();
    if cache.len() >= REGEX_CACHE_CAPACITY {
        cache.clear();
    }
    cache.insert(pattern.to_string(), regex.clone());
    Ok(regex)
}

/// Apply a unary operator
pub fn unary(op: UnaryOperator, operand: Val) -> Val {
    if operand.is_error() {
        return operand;
    }
    match op {
        UnaryOperator::Not => match operand.as_bool() {
            Some(b) => Val::from(!b),
            None => boolean_mismatch(&operand),
        },
        UnaryOperator::Negate => match operand.get() {
            Some(Value::Number(n)) => match n.as_i64().and_then(i64::checked_neg) {
                Some(i) => Val::of(i),
                None => float(-n.as_f64().unwrap_or_default()),
            },
            _ => number_mismatch(&operand),
        },
    }
}

/// Apply an eagerly evaluated binary operator to two operand values
///
/// Lazy `&&` and `||` are evaluated here too once both sides are known.
pub fn binary(op: BinaryOperator, left: &Val, right: &Val) -> Val {
    if left.is_error() {
        return left.clone();
    }
    if right.is_error() {
        return right.clone();
    }
    match op {
        BinaryOperator::And | BinaryOperator::EagerAnd => boolean(left, right, |a, b| a && b),
        BinaryOperator::Or | BinaryOperator::EagerOr => boolean(left, right, |a, b| a || b),
        BinaryOperator::Equals => Val::from(values_equal(left, right)),
        BinaryOperator::NotEquals => Val::from(!values_equal(left, right)),
        BinaryOperator::Less => compare(left, right, Ordering::is_lt),
        BinaryOperator::LessEquals => compare(left, right, Ordering::is_le),
        BinaryOperator::Greater => compare(left, right, Ordering::is_gt),
        BinaryOperator::GreaterEquals => compare(left, right, Ordering::is_ge),
        BinaryOperator::ElementOf => element_of(left, right),
        BinaryOperator::Regex => regex_match(left, right),
        BinaryOperator::Plus => plus(left, right),
        BinaryOperator::Minus => arithmetic(left, right, i64::checked_sub, |a, b| a - b),
        BinaryOperator::Multiply => arithmetic(left, right, i64::checked_mul, |a, b| a * b),
        BinaryOperator::Divide => divide(left, right),
        BinaryOperator::Modulo => modulo(left, right),
    }
}

fn boolean_mismatch(value: &Val) -> Val {
    Val::error(format!(
        "Type mismatch. Boolean operation expects boolean values, but got: '{}'.",
        value
    ))
}

fn number_mismatch(value: &Val) -> Val {
    Val::error(format!(
        "Type mismatch. Number operation expects number values, but got: '{}'.",
        value
    ))
}

fn float(value: f64) -> Val {
    match Number::from_f64(value) {
        Some(n) => Val::of(Value::Number(n)),
        None => Val::error(format!("Arithmetic result is not a finite number: {}", value)),
    }
}

fn boolean(left: &Val, right: &Val, f: impl Fn(bool, bool) -> bool) -> Val {
    match (left.as_bool(), right.as_bool()) {
        (Some(a), Some(b)) => Val::from(f(a, b)),
        (None, _) => boolean_mismatch(left),
        (_, None) => boolean_mismatch(right),
    }
}

fn numbers<'a>(left: &'a Val, right: &'a Val) -> Result<(&'a Number, &'a Number), Val> {
    match (left.get(), right.get()) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => Ok((a, b)),
        (Some(Value::Number(_)), _) => Err(number_mismatch(right)),
        _ => Err(number_mismatch(left)),
    }
}

/// Structural equality where numbers compare by numeric value
pub fn json_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| json_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).map(|w| json_equal(v, w)).unwrap_or(false))
        }
        _ => left == right,
    }
}

fn values_equal(left: &Val, right: &Val) -> bool {
    match (left.get(), right.get()) {
        (Some(a), Some(b)) => json_equal(a, b),
        _ => left.is_undefined() && right.is_undefined(),
    }
}

fn compare(left: &Val, right: &Val, accept: fn(Ordering) -> bool) -> Val {
    let (a, b) = match numbers(left, right) {
        Ok(pair) => pair,
        Err(e) => return e,
    };
    let ordering = match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y)),
    };
    match ordering {
        Some(ordering) => Val::from(accept(ordering)),
        None => Val::error("Numbers are not comparable"),
    }
}

fn element_of(left: &Val, right: &Val) -> Val {
    let Some(items) = right.as_array() else {
        return Val::error(format!(
            "Type mismatch. 'in' expects an array on the right side, but got: '{}'.",
            right
        ));
    };
    match left.get() {
        Some(needle) => Val::from(items.iter().any(|item| json_equal(needle, item))),
        None => Val::false_val(),
    }
}

fn regex_match(left: &Val, right: &Val) -> Val {
    let Some(pattern) = right.as_str() else {
        return Val::error(format!(
            "Type mismatch. Regular expression must be a string, but got: '{}'.",
            right
        ));
    };
    let Some(text) = left.as_str() else {
        return Val::false_val();
    };
    match compiled_regex(pattern) {
        Ok(regex) => Val::from(regex.is_match(text)),
        Err(e) => Val::error(format!("Invalid regular expression '{}': {}", pattern, e)),
    }
}

fn text_of(value: &Val) -> String {
    match value.get() {
        Some(Value::String(s)) => s.clone(),
        _ => value.to_string(),
    }
}

fn plus(left: &Val, right: &Val) -> Val {
    let is_text = |v: &Val| matches!(v.get(), Some(Value::String(_)));
    if is_text(left) || is_text(right) {
        return Val::of(format!("{}{}", text_of(left), text_of(right)));
    }
    arithmetic(left, right, i64::checked_add, |a, b| a + b)
}

fn arithmetic(
    left: &Val,
    right: &Val,
    integral: fn(i64, i64) -> Option<i64>,
    fractional: fn(f64, f64) -> f64,
) -> Val {
    let (a, b) = match numbers(left, right) {
        Ok(pair) => pair,
        Err(e) => return e,
    };
    if let Some(result) = a.as_i64().zip(b.as_i64()).and_then(|(x, y)| integral(x, y)) {
        return Val::of(result);
    }
    float(fractional(
        a.as_f64().unwrap_or_default(),
        b.as_f64().unwrap_or_default(),
    ))
}

fn is_zero(n: &Number) -> bool {
    n.as_f64().map(|f| f == 0.0).unwrap_or(false)
}

fn divide(left: &Val, right: &Val) -> Val {
    let (a, b) = match numbers(left, right) {
        Ok(pair) => pair,
        Err(e) => return e,
    };
    if is_zero(b) {
        return Val::error("Division by zero");
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if x.checked_rem(y) == Some(0) {
            if let Some(q) = x.checked_div(y) {
                return Val::of(q);
            }
        }
    }
    float(a.as_f64().unwrap_or_default() / b.as_f64().unwrap_or_default())
}

fn modulo(left: &Val, right: &Val) -> Val {
    let (a, b) = match numbers(left, right) {
        Ok(pair) => pair,
        Err(e) => return e,
    };
    if is_zero(b) {
        return Val::error("Division by zero");
    }
    if let Some(r) = a.as_i64().zip(b.as_i64()).and_then(|(x, y)| x.checked_rem(y)) {
        return Val::of(r);
    }
    float(a.as_f64().unwrap_or_default() % b.as_f64().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_arithmetic_stays_integral() {
        assert_eq!(binary(BinaryOperator::Plus, &Val::of(2), &Val::of(3)), Val::of(5));
        assert_eq!(binary(BinaryOperator::Divide, &Val::of(10), &Val::of(2)), Val::of(5));
        assert_eq!(binary(BinaryOperator::Divide, &Val::of(7), &Val::of(2)), Val::of(3.5));
        assert_eq!(binary(BinaryOperator::Modulo, &Val::of(7), &Val::of(4)), Val::of(3));
    }

    #[test]
    fn test_division_by_zero() {
        assert!(binary(BinaryOperator::Divide, &Val::of(10), &Val::of(0)).is_error());
        assert!(binary(BinaryOperator::Modulo, &Val::of(1.5), &Val::of(0.0)).is_error());
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(
            binary(BinaryOperator::Plus, &Val::of("id-"), &Val::of(7)),
            Val::of("id-7")
        );
    }

    #[test]
    fn test_equality_is_numeric() {
        assert_eq!(binary(BinaryOperator::Equals, &Val::of(1), &Val::of(1.0)), Val::true_val());
        assert_eq!(
            binary(BinaryOperator::Equals, &Val::Undefined, &Val::Undefined),
            Val::true_val()
        );
        assert_eq!(binary(BinaryOperator::NotEquals, &Val::of(1), &Val::Undefined), Val::true_val());
    }

    #[test]
    fn test_comparison_type_mismatch() {
        assert_eq!(binary(BinaryOperator::Less, &Val::of(1), &Val::of(2)), Val::true_val());
        assert!(binary(BinaryOperator::Less, &Val::of("a"), &Val::of(2)).is_error());
    }

    #[test]
    fn test_element_of() {
        let list = Val::of(json!(["read", "write"]));
        assert_eq!(binary(BinaryOperator::ElementOf, &Val::of("read"), &list), Val::true_val());
        assert_eq!(binary(BinaryOperator::ElementOf, &Val::Undefined, &list), Val::false_val());
        assert!(binary(BinaryOperator::ElementOf, &Val::of("read"), &Val::of(1)).is_error());
    }

    #[test]
    fn test_regex_is_full_match() {
        let pattern = Val::of("doc-[0-9]+");
        assert_eq!(binary(BinaryOperator::Regex, &Val::of("doc-12"), &pattern), Val::true_val());
        assert_eq!(binary(BinaryOperator::Regex, &Val::of("xdoc-12"), &pattern), Val::false_val());
        assert!(binary(BinaryOperator::Regex, &Val::of("a"), &Val::of("(")).is_error());
    }

    #[test]
    fn test_regex_compiled_once_per_pattern() {
        let pattern = "cached-[a-z]+";
        let first = compiled_regex(pattern).unwrap();
        assert!(REGEX_CACHE.lock().contains_key(pattern));
        let second = compiled_regex(pattern).unwrap();
        assert_eq!(first.as_str(), second.as_str());
        assert_eq!(first.as_str(), "^(?:cached-[a-z]+)$");

        assert!(compiled_regex("(").is_err());
        assert!(!REGEX_CACHE.lock().contains_key("("));
    }

    #[test]
    fn test_errors_are_absorbing() {
        let error = Val::error("left");
        assert_eq!(binary(BinaryOperator::Plus, &error, &Val::error("right")), error);
        assert_eq!(unary(UnaryOperator::Not, Val::error("x")), Val::error("x"));
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary(UnaryOperator::Not, Val::true_val()), Val::false_val());
        assert_eq!(unary(UnaryOperator::Negate, Val::of(4)), Val::of(-4));
        assert!(unary(UnaryOperator::Not, Val::of(1)).is_error());
    }
}
