//! Tagged evaluation values
//!
//! Every expression evaluates to a [`Val`]: either a JSON value, the absence of
//! a value (`Undefined`), or an evaluation error. Errors are absorbing: any
//! aggregate built from an error is that error.

use serde_json::{Map, Value};
use std::fmt;

/// Error message used when a filter meets an undefined value
pub const FILTERS_CANNOT_BE_APPLIED_TO_UNDEFINED_VALUES: &str =
    "Filters cannot be applied to undefined values.";

/// Immutable evaluation value
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    /// A concrete JSON value
    Defined(Value),

    /// No value. Never stored inside arrays or objects.
    Undefined,

    /// Evaluation error with a human readable message
    Error(String),
}

impl Val {
    /// Wrap a JSON value
    pub fn of(value: impl Into<Value>) -> Self {
        Val::Defined(value.into())
    }

    /// Create an error value
    pub fn error(message: impl Into<String>) -> Self {
        Val::Error(message.into())
    }

    /// `true` constant
    pub fn true_val() -> Self {
        Val::Defined(Value::Bool(true))
    }

    /// `false` constant
    pub fn false_val() -> Self {
        Val::Defined(Value::Bool(false))
    }

    /// `null` constant
    pub fn null() -> Self {
        Val::Defined(Value::Null)
    }

    /// Empty JSON array
    pub fn empty_array() -> Self {
        Val::Defined(Value::Array(Vec::new()))
    }

    /// Empty JSON object
    pub fn empty_object() -> Self {
        Val::Defined(Value::Object(Map::new()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Val::Error(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Val::Undefined)
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Val::Defined(_))
    }

    /// The JSON payload, if defined
    pub fn get(&self) -> Option<&Value> {
        match self {
            Val::Defined(value) => Some(value),
            _ => None,
        }
    }

    /// Consume into the JSON payload, if defined
    pub fn into_value(self) -> Option<Value> {
        match self {
            Val::Defined(value) => Some(value),
            _ => None,
        }
    }

    /// Error message, if this is an error
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Val::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.get().and_then(Value::as_bool)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.get().and_then(Value::as_str)
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        self.get().and_then(Value::as_array)
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        self.get().and_then(Value::as_object)
    }

    pub fn is_array(&self) -> bool {
        self.as_array().is_some()
    }

    pub fn is_object(&self) -> bool {
        self.as_object().is_some()
    }

    /// Require a boolean, turning anything else into an error value
    pub fn require_bool(self, what: &str) -> Val {
        match self {
            Val::Error(_) => self,
            Val::Defined(Value::Bool(_)) => self,
            other => Val::error(format!(
                "Type mismatch. {} must be a boolean value, but was: {}",
                what, other
            )),
        }
    }
}

impl From<Value> for Val {
    fn from(value: Value) -> Self {
        Val::Defined(value)
    }
}

impl From<bool> for Val {
    fn from(value: bool) -> Self {
        Val::Defined(Value::Bool(value))
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Defined(value) => write!(f, "{}", value),
            Val::Undefined => write!(f, "undefined"),
            Val::Error(message) => write!(f, "ERROR[{}]", message),
        }
    }
}

/// Collect values into a JSON array: undefined members are dropped, the first
/// error wins.
pub fn collect_array<I>(values: I) -> Val
where
    I: IntoIterator<Item = Val>,
{
    let mut items = Vec::new();
    for value in values {
        match value {
            Val::Error(_) => return value,
            Val::Defined(item) => items.push(item),
            Val::Undefined => {}
        }
    }
    Val::Defined(Value::Array(items))
}

/// Collect named values into a JSON object, keeping field order. Undefined
/// fields are dropped, the first error wins.
pub fn collect_object<I>(fields: I) -> Val
where
    I: IntoIterator<Item = (String, Val)>,
{
    let mut object = Map::new();
    for (key, value) in fields {
        match value {
            Val::Error(_) => return value,
            Val::Defined(item) => {
                object.insert(key, item);
            }
            Val::Undefined => {}
        }
    }
    Val::Defined(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_array_elides_undefined() {
        let result = collect_array(vec![Val::Undefined, Val::of(1), Val::of(2)]);
        assert_eq!(result, Val::of(json!([1, 2])));
    }

    #[test]
    fn test_collect_array_error_is_absorbing() {
        let result = collect_array(vec![Val::of(1), Val::error("boom"), Val::error("later")]);
        assert_eq!(result, Val::error("boom"));
    }

    #[test]
    fn test_collect_object_keeps_order() {
        let result = collect_object(vec![
            ("z".to_string(), Val::of(1)),
            ("a".to_string(), Val::Undefined),
            ("m".to_string(), Val::of(3)),
        ]);
        let object = result.as_object().unwrap();
        let keys: Vec<_> = object.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "m"]);
    }

    #[test]
    fn test_require_bool() {
        assert_eq!(Val::true_val().require_bool("x"), Val::true_val());
        assert!(Val::of(1).require_bool("x").is_error());
        assert!(Val::Undefined.require_bool("x").is_error());
        assert_eq!(Val::error("e").require_bool("x"), Val::error("e"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Val::Undefined.to_string(), "undefined");
        assert_eq!(Val::of(json!({"a": 1})).to_string(), r#"{"a":1}"#);
        assert_eq!(Val::error("x").to_string(), "ERROR[x]");
    }
}
