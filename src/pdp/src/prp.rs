//! Policy retrieval point
//!
//! Holds the current index snapshot. Readers clone the current `Arc` and work
//! on it without locking; writers are serialized and publish a complete new
//! snapshot, so a retrieval observes either the old or the new document set.

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::attributes::AttributeContext;
use crate::config::PdpConfig;
use crate::context::EvaluationContext;
use crate::error::Result;
use crate::functions::FunctionContext;
use crate::index::{create_index, DocumentIndex, PolicyRetrievalResult, PrpUpdateEvent, TargetEvaluator};
use crate::types::AuthorizationSubscription;

/// Versioned holder of the current document index
pub struct PolicyRetrievalPoint {
    current: watch::Sender<Arc<dyn DocumentIndex>>,
    writer: Mutex<()>,
    context: EvaluationContext,
}

impl PolicyRetrievalPoint {
    /// Create a retrieval point around an initial snapshot
    ///
    /// `context` is the base evaluation context: attribute finders, functions
    /// and environment variables.
    pub fn new(index: Arc<dyn DocumentIndex>, context: EvaluationContext) -> Self {
        let (current, _) = watch::channel(index);
        Self {
            current,
            writer: Mutex::new(()),
            context,
        }
    }

    /// Create an empty retrieval point as configured
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn from_config(
        config: &PdpConfig,
        attributes: Arc<dyn AttributeContext>,
        functions: Arc<dyn FunctionContext>,
    ) -> Result<Self> {
        config.validate()?;
        let context = EvaluationContext::new(attributes, functions)
            .with_global_variables(config.variables.clone())?;
        let index = create_index(
            config.index.kind,
            config.index.predicate_order,
            config.index.max_clauses,
        );
        info!(
            "Policy retrieval point using {:?} index ({:?} predicate order)",
            config.index.kind, config.index.predicate_order
        );
        Ok(Self::new(index, context))
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<dyn DocumentIndex> {
        self.current.borrow().clone()
    }

    /// Watch snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<Arc<dyn DocumentIndex>> {
        self.current.subscribe()
    }

    /// Evaluation context for one subscription
    pub fn context_for(&self, subscription: &AuthorizationSubscription) -> EvaluationContext {
        self.context.for_subscription(subscription)
    }

    /// Apply a batch of updates atomically and publish the resulting snapshot
    ///
    /// # Errors
    ///
    /// Returns `FatalUpdate` if the batch is rejected. The current snapshot
    /// stays in place.
    pub fn apply_update(&self, event: &PrpUpdateEvent) -> Result<Arc<dyn DocumentIndex>> {
        let _guard = self.writer.lock();
        let next = self.snapshot().apply_update(event)?;
        debug!(
            "Publishing snapshot version {} ({} updates)",
            next.version(),
            event.updates.len()
        );
        self.current.send_replace(Arc::clone(&next));
        Ok(next)
    }

    /// Match the current snapshot against a subscription
    pub async fn retrieve(&self, subscription: &AuthorizationSubscription) -> PolicyRetrievalResult {
        let snapshot = self.snapshot();
        let evaluator = TargetEvaluator::new(&self.context_for(subscription));
        snapshot.retrieve(&evaluator).await
    }

    /// Match against the current snapshot and again after every published
    /// update
    pub fn retrieve_stream(
        &self,
        subscription: &AuthorizationSubscription,
    ) -> BoxStream<'static, PolicyRetrievalResult> {
        let evaluator = TargetEvaluator::new(&self.context_for(subscription));
        stream::unfold(
            (self.subscribe(), evaluator, true),
            |(mut receiver, evaluator, first)| async move {
                if !first {
                    receiver.changed().await.ok()?;
                }
                let snapshot = receiver.borrow_and_update().clone();
                let result = snapshot.retrieve(&evaluator).await;
                Some((result, (receiver, evaluator, false)))
            },
        )
        .boxed()
    }
}
