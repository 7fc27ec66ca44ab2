//! Error types for the policy decision point
//!
//! Evaluation problems that happen while a policy is being evaluated are not
//! reported through this type: they travel in-band as [`Val::Error`] so that
//! they can propagate through composite values. `PdpError` covers everything
//! that fails outside of an evaluation stream.
//!
//! [`Val::Error`]: crate::value::Val::Error

use thiserror::Error;

/// Policy decision point errors
#[derive(Debug, Error)]
pub enum PdpError {
    /// A canonical clause or formula could not be constructed
    #[error("Invalid formula: {0}")]
    InvalidFormula(String),

    /// A document target could not be compiled into the index
    #[error("Index construction failed: {0}")]
    IndexConstruction(String),

    /// An update batch was rejected; the current snapshot stays in place
    #[error("Fatal update error: {0}")]
    FatalUpdate(String),

    /// A target predicate did not evaluate to a boolean
    #[error("Predicate evaluation failed: {0}")]
    PredicateEvaluation(String),

    /// Attribute finder registration or lookup failure
    #[error("Attribute resolution failed: {0}")]
    AttributeResolution(String),

    /// Illegal variable binding
    #[error("Invalid variable binding: {0}")]
    InvalidVariable(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for policy decision point operations
pub type Result<T> = std::result::Result<T, PdpError>;
