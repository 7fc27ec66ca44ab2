//! Evaluation context
//!
//! The context is an immutable record handed down the evaluation tree by
//! value. Scoped bindings (variables, the relative node) are introduced by
//! deriving a new context, so a binding made for one branch can never be
//! observed by a sibling branch.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::ast::{resolve_name, Imports};
use crate::attributes::{AttributeContext, AttributeRegistry};
use crate::error::{PdpError, Result};
use crate::functions::{FunctionContext, FunctionLibrary};
use crate::types::{AuthorizationSubscription, ACTION, ENVIRONMENT, RESOURCE, SUBJECT, SUBSCRIPTION_VARIABLES};
use crate::value::Val;

/// Variable bindings visible to an evaluation
pub type Variables = HashMap<String, Val>;

/// Immutable evaluation context
#[derive(Clone)]
pub struct EvaluationContext {
    attributes: Arc<dyn AttributeContext>,
    functions: Arc<dyn FunctionContext>,
    variables: Arc<Variables>,
    imports: Arc<Imports>,
    relative_node: Val,
    in_target: bool,
}

impl EvaluationContext {
    /// Create a context without any variables bound
    pub fn new(attributes: Arc<dyn AttributeContext>, functions: Arc<dyn FunctionContext>) -> Self {
        Self {
            attributes,
            functions,
            variables: Arc::new(Variables::new()),
            imports: Arc::new(Imports::new()),
            relative_node: Val::Undefined,
            in_target: false,
        }
    }

    /// Context with no attribute finders and the standard function library
    pub fn with_standard_library() -> Self {
        Self::new(
            Arc::new(AttributeRegistry::new()),
            Arc::new(FunctionLibrary::with_standard_library()),
        )
    }

    /// Bind environment-level variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidVariable` if one of the names is a subscription variable
    pub fn with_global_variables<I>(&self, variables: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut ctx = self.clone();
        for (name, value) in variables {
            ctx = ctx.with_variable(&name, Val::of(value))?;
        }
        Ok(ctx)
    }

    /// Bind the subscription variables for one request
    pub fn for_subscription(&self, subscription: &AuthorizationSubscription) -> Self {
        let mut variables = (*self.variables).clone();
        for (name, value) in [
            (SUBJECT, &subscription.subject),
            (ACTION, &subscription.action),
            (RESOURCE, &subscription.resource),
            (ENVIRONMENT, &subscription.environment),
        ] {
            variables.insert(name.to_string(), Val::of(value.clone()));
        }
        Self {
            variables: Arc::new(variables),
            ..self.clone()
        }
    }

    /// Bind a variable, shadowing any previous binding of the same name
    ///
    /// # Errors
    ///
    /// Returns `InvalidVariable` when `name` is a subscription variable
    pub fn with_variable(&self, name: &str, value: Val) -> Result<Self> {
        if SUBSCRIPTION_VARIABLES.contains(&name) {
            return Err(PdpError::InvalidVariable(format!(
                "cannot overwrite request attribute '{}'",
                name
            )));
        }
        let mut variables = (*self.variables).clone();
        variables.insert(name.to_string(), value);
        Ok(Self {
            variables: Arc::new(variables),
            ..self.clone()
        })
    }

    /// Use the import table of a document
    pub fn with_imports(&self, imports: &Imports) -> Self {
        Self {
            imports: Arc::new(imports.clone()),
            ..self.clone()
        }
    }

    /// Bind the relative node (`@`)
    pub fn with_relative_node(&self, node: Val) -> Self {
        Self {
            relative_node: node,
            ..self.clone()
        }
    }

    /// Switch into target evaluation, where attribute finders are forbidden
    pub fn for_target(&self) -> Self {
        Self {
            in_target: true,
            ..self.clone()
        }
    }

    pub fn in_target(&self) -> bool {
        self.in_target
    }

    pub fn relative_node(&self) -> &Val {
        &self.relative_node
    }

    /// Value bound to `name`; unbound names are undefined
    pub fn variable(&self, name: &str) -> Val {
        self.variables.get(name).cloned().unwrap_or(Val::Undefined)
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn functions(&self) -> &dyn FunctionContext {
        self.functions.as_ref()
    }

    pub fn attributes(&self) -> &dyn AttributeContext {
        self.attributes.as_ref()
    }

    /// Resolve a function or attribute name through the current imports
    pub fn resolve(&self, name: &str) -> String {
        resolve_name(&self.imports, name)
    }
}

impl fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("variables", &self.variables)
            .field("imports", &self.imports)
            .field("relative_node", &self.relative_node)
            .field("in_target", &self.in_target)
            .finish()
    }
}
