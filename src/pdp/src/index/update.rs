//! Update events for the document index

use serde::{Deserialize, Serialize};

use crate::ast::Document;

/// A single change of the document set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Update {
    /// Add a new document. Its name must not be in use.
    Publish(Document),
    /// Remove the document with this name
    Withdraw(String),
    /// The document source is in a consistent state again
    MarkConsistent,
    /// The document source is mid-update
    MarkInconsistent,
}

/// A batch of updates applied atomically
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrpUpdateEvent {
    pub updates: Vec<Update>,
}

impl PrpUpdateEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(mut self, document: Document) -> Self {
        self.updates.push(Update::Publish(document));
        self
    }

    pub fn withdraw(mut self, name: impl Into<String>) -> Self {
        self.updates.push(Update::Withdraw(name.into()));
        self
    }

    pub fn consistent(mut self) -> Self {
        self.updates.push(Update::MarkConsistent);
        self
    }

    pub fn inconsistent(mut self) -> Self {
        self.updates.push(Update::MarkInconsistent);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

impl From<Vec<Update>> for PrpUpdateEvent {
    fn from(updates: Vec<Update>) -> Self {
        Self { updates }
    }
}
