//! Function libraries available to policy expressions
//!
//! Functions are synchronous and pure. They receive already evaluated
//! arguments and return a [`Val`]; failures are returned as `Val::Error`.
//! Filter functions receive the value being filtered as first argument.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{PdpError, Result};
use crate::value::Val;

/// A registered function
pub type Function = Arc<dyn Fn(&[Val]) -> Val + Send + Sync>;

/// Function lookup used by the interpreter
pub trait FunctionContext: Send + Sync {
    /// Call the function registered under the fully-qualified `name`
    fn evaluate(&self, name: &str, arguments: &[Val]) -> Val;

    /// Whether a function with this name exists
    fn is_provided(&self, name: &str) -> bool;
}

/// Registry of functions keyed by fully-qualified name (`library.function`)
#[derive(Clone, Default)]
pub struct FunctionLibrary {
    functions: HashMap<String, Function>,
}

impl FunctionLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a library with the built-in `filter.*`, `standard.*` and `auth.*`
    /// functions
    pub fn with_standard_library() -> Self {
        let mut library = Self::new();
        let builtins: [(&str, fn(&[Val]) -> Val); 6] = [
            ("filter.blacken", blacken),
            ("filter.remove", remove),
            ("filter.replace", replace),
            ("standard.length", length),
            ("standard.contains", contains),
            ("auth.hasRole", has_role),
        ];
        for (name, function) in builtins {
            library.functions.insert(name.to_string(), Arc::new(function));
        }
        library
    }

    /// Register a function
    ///
    /// # Errors
    ///
    /// Returns an error if a function with the same name is already registered
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> Result<()>
    where
        F: Fn(&[Val]) -> Val + Send + Sync + 'static,
    {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(PdpError::InvalidConfig(format!(
                "function '{}' is already registered",
                name
            )));
        }
        debug!("Registered function {}", name);
        self.functions.insert(name, Arc::new(function));
        Ok(())
    }

    /// Names of all registered functions
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl FunctionContext for FunctionLibrary {
    fn evaluate(&self, name: &str, arguments: &[Val]) -> Val {
        if let Some(error) = arguments.iter().find(|a| a.is_error()) {
            return error.clone();
        }
        match self.functions.get(name) {
            Some(function) => function(arguments),
            None => Val::error(format!("Unknown function {}", name)),
        }
    }

    fn is_provided(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

fn arity_error(name: &str, expected: &str, arguments: &[Val]) -> Val {
    Val::error(format!(
        "Function {} expects {} argument(s), got {}",
        name,
        expected,
        arguments.len()
    ))
}

fn integer_argument(arguments: &[Val], index: usize, default: i64) -> std::result::Result<i64, Val> {
    match arguments.get(index) {
        None => Ok(default),
        Some(value) => value
            .get()
            .and_then(Value::as_i64)
            .filter(|n| *n >= 0)
            .ok_or_else(|| Val::error(format!("Argument {} must be a non-negative integer", index))),
    }
}

/// Mask a string, optionally keeping characters visible on both ends
///
/// `filter.blacken(text, discloseLeft = 0, discloseRight = 0, replacement = "X")`
pub fn blacken(arguments: &[Val]) -> Val {
    if arguments.is_empty() || arguments.len() > 4 {
        return arity_error("filter.blacken", "1 to 4", arguments);
    }
    let Some(text) = arguments[0].as_str() else {
        return Val::error("filter.blacken can only be applied to text");
    };
    let left = match integer_argument(arguments, 1, 0) {
        Ok(n) => n as usize,
        Err(e) => return e,
    };
    let right = match integer_argument(arguments, 2, 0) {
        Ok(n) => n as usize,
        Err(e) => return e,
    };
    let replacement = match arguments.get(3) {
        None => "X",
        Some(value) => match value.as_str() {
            Some(r) => r,
            None => return Val::error("Replacement of filter.blacken must be text"),
        },
    };

    let chars: Vec<char> = text.chars().collect();
    if left + right >= chars.len() {
        return Val::of(text);
    }
    let mut result = String::with_capacity(text.len());
    result.extend(&chars[..left]);
    for _ in left..chars.len() - right {
        result.push_str(replacement);
    }
    result.extend(&chars[chars.len() - right..]);
    Val::of(result)
}

/// Remove the filtered value
pub fn remove(arguments: &[Val]) -> Val {
    if arguments.len() != 1 {
        return arity_error("filter.remove", "1", arguments);
    }
    Val::Undefined
}

/// Replace the filtered value by the second argument
pub fn replace(arguments: &[Val]) -> Val {
    if arguments.len() != 2 {
        return arity_error("filter.replace", "2", arguments);
    }
    arguments[1].clone()
}

/// Number of elements, fields or characters
pub fn length(arguments: &[Val]) -> Val {
    if arguments.len() != 1 {
        return arity_error("standard.length", "1", arguments);
    }
    match arguments[0].get() {
        Some(Value::Array(items)) => Val::of(items.len()),
        Some(Value::Object(fields)) => Val::of(fields.len()),
        Some(Value::String(text)) => Val::of(text.chars().count()),
        _ => Val::error("standard.length expects an array, object or text"),
    }
}

/// Check if an array contains a value
///
/// `standard.contains(list, value)`
pub fn contains(arguments: &[Val]) -> Val {
    if arguments.len() != 2 {
        return arity_error("standard.contains", "2", arguments);
    }
    let Some(list) = arguments[0].as_array() else {
        return Val::error("standard.contains expects an array as first argument");
    };
    match arguments[1].get() {
        Some(value) => Val::from(list.contains(value)),
        None => Val::false_val(),
    }
}

/// Check if a subject object has a role in its `roles` array
///
/// `auth.hasRole(subject, "admin")`
pub fn has_role(arguments: &[Val]) -> Val {
    if arguments.len() != 2 {
        return arity_error("auth.hasRole", "2", arguments);
    }
    let Some(subject) = arguments[0].as_object() else {
        return Val::error("subject must be an object");
    };
    let Some(role) = arguments[1].as_str() else {
        return Val::error("role must be a string");
    };

    let found = subject
        .get("roles")
        .and_then(Value::as_array)
        .map(|roles| roles.iter().any(|r| r.as_str() == Some(role)))
        .unwrap_or(false);
    Val::from(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_role_true() {
        let subject = Val::of(json!({"id": "user123", "roles": ["admin", "editor"]}));
        assert_eq!(has_role(&[subject, Val::of("admin")]), Val::true_val());
    }

    #[test]
    fn test_has_role_no_roles() {
        let subject = Val::of(json!({"id": "user123"}));
        assert_eq!(has_role(&[subject, Val::of("admin")]), Val::false_val());
    }

    #[test]
    fn test_contains() {
        let list = Val::of(json!(["read", "write", "delete"]));
        assert_eq!(contains(&[list.clone(), Val::of("read")]), Val::true_val());
        assert_eq!(contains(&[list.clone(), Val::of("admin")]), Val::false_val());
        assert_eq!(contains(&[list, Val::Undefined]), Val::false_val());
    }

    #[test]
    fn test_blacken() {
        assert_eq!(blacken(&[Val::of("secret")]), Val::of("XXXXXX"));
        assert_eq!(
            blacken(&[Val::of("4711-1234"), Val::of(0), Val::of(4)]),
            Val::of("XXXXX1234")
        );
        assert_eq!(
            blacken(&[Val::of("abcdef"), Val::of(1), Val::of(1), Val::of("*")]),
            Val::of("a****f")
        );
        assert!(blacken(&[Val::of(12)]).is_error());
        assert!(blacken(&[Val::of("abc"), Val::of(-1)]).is_error());
    }

    #[test]
    fn test_remove_and_replace() {
        assert_eq!(remove(&[Val::of(1)]), Val::Undefined);
        assert_eq!(replace(&[Val::of(1), Val::of("x")]), Val::of("x"));
        assert!(replace(&[Val::of(1)]).is_error());
    }

    #[test]
    fn test_length() {
        assert_eq!(length(&[Val::of(json!([1, 2, 3]))]), Val::of(3));
        assert_eq!(length(&[Val::of("äbc")]), Val::of(3));
        assert!(length(&[Val::of(1)]).is_error());
    }

    #[test]
    fn test_library_lookup() {
        let library = FunctionLibrary::with_standard_library();
        assert!(library.is_provided("filter.remove"));
        assert!(library.evaluate("nope.nothing", &[]).is_error());
        assert_eq!(
            library.evaluate("standard.length", &[Val::of(json!({"a": 1}))]),
            Val::of(1)
        );
        // errors in arguments win over the call
        assert_eq!(
            library.evaluate("standard.length", &[Val::error("bad")]),
            Val::error("bad")
        );
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut library = FunctionLibrary::with_standard_library();
        assert!(library.register("filter.remove", |_| Val::Undefined).is_err());
        assert!(library.register("custom.one", |_| Val::of(1)).is_ok());
        assert!(library.names().contains(&"custom.one"));
    }
}
