//! Core authorization types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names of the four subscription variables. They are bound for every
/// evaluation and can never be rebound by a policy.
pub const SUBJECT: &str = "subject";
pub const ACTION: &str = "action";
pub const RESOURCE: &str = "resource";
pub const ENVIRONMENT: &str = "environment";

/// All reserved subscription variable names
pub const SUBSCRIPTION_VARIABLES: [&str; 4] = [SUBJECT, ACTION, RESOURCE, ENVIRONMENT];

/// Authorization subscription (the request matched against documents)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthorizationSubscription {
    /// Who is making the request
    #[serde(default)]
    pub subject: Value,

    /// What is being done
    #[serde(default)]
    pub action: Value,

    /// What is being accessed
    #[serde(default)]
    pub resource: Value,

    /// Additional environment (time, location, etc.)
    #[serde(default)]
    pub environment: Value,
}

impl AuthorizationSubscription {
    /// Create a subscription without environment
    pub fn new(subject: impl Into<Value>, action: impl Into<Value>, resource: impl Into<Value>) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
            resource: resource.into(),
            environment: Value::Null,
        }
    }

    /// Add an environment object
    pub fn with_environment(mut self, environment: impl Into<Value>) -> Self {
        self.environment = environment.into();
        self
    }
}

/// Decision outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Permit,
    Deny,
    Indeterminate,
    NotApplicable,
}

/// Decision of a single document, including constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    /// Outcome
    pub decision: Decision,

    /// Transformed resource, if the document defines a transformation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,

    /// Obligations the enforcement point must fulfil
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obligations: Option<Vec<Value>>,

    /// Advice the enforcement point may follow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Vec<Value>>,
}

impl AuthorizationDecision {
    /// Create a decision without constraints
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            resource: None,
            obligations: None,
            advice: None,
        }
    }

    pub fn permit() -> Self {
        Self::new(Decision::Permit)
    }

    pub fn deny() -> Self {
        Self::new(Decision::Deny)
    }

    pub fn indeterminate() -> Self {
        Self::new(Decision::Indeterminate)
    }

    pub fn not_applicable() -> Self {
        Self::new(Decision::NotApplicable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscription_creation() {
        let subscription = AuthorizationSubscription::new(json!({"name": "alice"}), "read", "document:123")
            .with_environment(json!({"ip": "10.0.0.1"}));

        assert_eq!(subscription.subject["name"], "alice");
        assert_eq!(subscription.action, json!("read"));
        assert_eq!(subscription.environment["ip"], "10.0.0.1");
    }

    #[test]
    fn test_decision_serialization() {
        let decision = AuthorizationDecision::not_applicable();
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json, json!({"decision": "NOT_APPLICABLE"}));
    }

    #[test]
    fn test_subscription_defaults_missing_fields() {
        let subscription: AuthorizationSubscription =
            serde_json::from_value(json!({"subject": "bob"})).unwrap();
        assert_eq!(subscription.action, Value::Null);
        assert_eq!(subscription.subject, json!("bob"));
    }
}
