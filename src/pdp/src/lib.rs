//! # CretoAI Policy Decision Point
//!
//! Streaming attribute-based policy evaluation with a canonical target index.
//!
//! ## Features
//!
//! - **Streaming evaluation**: expressions evaluate to streams of values that
//!   follow changing attributes
//! - **In-band errors**: evaluation failures are values and propagate through
//!   composite results
//! - **Canonical index**: document targets are normalized into disjunctive
//!   normal form so shared predicates are evaluated once per subscription
//! - **Copy-on-write snapshots**: retrievals never block on updates
//!
//! ## Example
//!
//! ```rust
//! use cretoai_pdp::{
//!     ast::{Document, Entitlement, Expression},
//!     index::PrpUpdateEvent,
//!     AuthorizationSubscription, EvaluationContext, PdpConfig, PolicyRetrievalPoint,
//! };
//! use cretoai_pdp::index::create_index;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PdpConfig::default();
//!     let prp = PolicyRetrievalPoint::new(
//!         create_index(config.index.kind, config.index.predicate_order, config.index.max_clauses),
//!         EvaluationContext::with_standard_library(),
//!     );
//!
//!     let document = Document::new("readers", Entitlement::Permit).with_target(
//!         Expression::equals(Expression::identifier("action"), Expression::value("read")),
//!     );
//!     prp.apply_update(&PrpUpdateEvent::new().publish(document))?;
//!
//!     let result = prp
//!         .retrieve(&AuthorizationSubscription::new("alice", "read", "report"))
//!         .await;
//!     assert_eq!(result.document_names(), vec!["readers"]);
//!
//!     Ok(())
//! }
//! ```

pub mod ast;
pub mod attributes;
pub mod config;
pub mod context;
pub mod error;
pub mod functions;
pub mod index;
pub mod interpreter;
pub mod policy;
pub mod prp;
pub mod stream;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use attributes::{AttributeContext, AttributeRegistry};
pub use config::PdpConfig;
pub use context::EvaluationContext;
pub use error::{PdpError, Result};
pub use functions::{FunctionContext, FunctionLibrary};
pub use index::{DocumentIndex, IndexKind, PolicyRetrievalResult};
pub use prp::PolicyRetrievalPoint;
pub use types::{AuthorizationDecision, AuthorizationSubscription, Decision};
pub use value::Val;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
