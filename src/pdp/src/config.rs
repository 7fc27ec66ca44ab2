//! Policy decision point configuration loading and validation

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{PdpError, Result};
use crate::index::{IndexKind, PredicateOrder};
use crate::types::SUBSCRIPTION_VARIABLES;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PdpConfig {
    #[serde(default)]
    pub index: IndexSection,

    /// Variables bound into every evaluation
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IndexSection {
    #[serde(default)]
    pub kind: IndexKind,

    #[serde(default)]
    pub predicate_order: PredicateOrder,

    /// Limit on the number of clauses a single target may normalize into
    #[serde(default = "default_max_clauses")]
    pub max_clauses: usize,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            kind: IndexKind::default(),
            predicate_order: PredicateOrder::default(),
            max_clauses: default_max_clauses(),
        }
    }
}

fn default_max_clauses() -> usize {
    crate::index::canonical::DEFAULT_MAX_CLAUSES
}

impl PdpConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read configuration file {}", path.as_ref().display()))?;

        let config = Self::from_toml_str(&contents).context("Failed to parse configuration file")?;

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: PdpConfig =
            toml::from_str(contents).map_err(|e| PdpError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.index.max_clauses == 0 {
            return Err(PdpError::InvalidConfig(
                "index.max_clauses must be at least 1".to_string(),
            ));
        }

        if let Some(name) = self
            .variables
            .keys()
            .find(|name| SUBSCRIPTION_VARIABLES.contains(&name.as_str()))
        {
            return Err(PdpError::InvalidConfig(format!(
                "variable '{}' shadows a subscription attribute",
                name
            )));
        }

        Ok(())
    }
}
