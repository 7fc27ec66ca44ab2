//! Attribute finders (policy information points)
//!
//! An attribute finder turns a parent value and a list of arguments into a
//! potentially unbounded stream of values. Finders are looked up by their
//! fully-qualified `library.attribute` name.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::Variables;
use crate::error::{PdpError, Result};
use crate::stream::{self, ValStream};
use crate::value::Val;

/// A registered attribute finder
pub type AttributeFinder = Arc<dyn Fn(Val, Vec<Val>, &Variables) -> ValStream + Send + Sync>;

/// Attribute lookup used by the interpreter
pub trait AttributeContext: Send + Sync {
    /// Subscribe to the attribute `name` of `parent`
    ///
    /// Unknown attributes yield a stream of exactly one error value.
    fn evaluate_attribute(
        &self,
        name: &str,
        parent: Val,
        arguments: Vec<Val>,
        variables: &Variables,
    ) -> ValStream;

    /// Whether a finder with this name exists
    fn is_provided(&self, name: &str) -> bool;
}

/// Registry of attribute finders
#[derive(Clone, Default)]
pub struct AttributeRegistry {
    finders: HashMap<String, AttributeFinder>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a finder under a fully-qualified name
    ///
    /// # Errors
    ///
    /// Returns `AttributeResolution` if the name is already taken
    pub fn register<F>(&mut self, name: impl Into<String>, finder: F) -> Result<()>
    where
        F: Fn(Val, Vec<Val>, &Variables) -> ValStream + Send + Sync + 'static,
    {
        let name = name.into();
        if self.finders.contains_key(&name) {
            warn!("Rejected duplicate attribute finder {}", name);
            return Err(PdpError::AttributeResolution(format!(
                "an attribute finder named '{}' is already registered",
                name
            )));
        }
        debug!("Registered attribute finder {}", name);
        self.finders.insert(name, Arc::new(finder));
        Ok(())
    }

    /// Number of registered finders
    pub fn len(&self) -> usize {
        self.finders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finders.is_empty()
    }
}

impl AttributeContext for AttributeRegistry {
    fn evaluate_attribute(
        &self,
        name: &str,
        parent: Val,
        arguments: Vec<Val>,
        variables: &Variables,
    ) -> ValStream {
        match self.finders.get(name) {
            Some(finder) => finder(parent, arguments, variables),
            None => stream::error(format!("Unknown attribute {}", name)),
        }
    }

    fn is_provided(&self, name: &str) -> bool {
        self.finders.contains_key(name)
    }
}
