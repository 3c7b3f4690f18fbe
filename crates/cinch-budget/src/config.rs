//! Policy configuration for the [`BudgetManager`](crate::manager::BudgetManager).
//!
//! All values have defaults; a JSON file only needs the fields it overrides:
//!
//! ```json
//! {
//!   "min_preserved_messages": 4,
//!   "reduction_factor": 0.5,
//!   "compaction": { "preview_chars": 1200 }
//! }
//! ```
//!
//! The reduction factor and compaction threshold are policy knobs, not
//! derived values. Tune them per provider.

use crate::context::compactor::CompactionConfig;
use crate::context::estimator::{CharRatioEstimator, DEFAULT_CHARS_PER_TOKEN};
use crate::context::overflow::{DEFAULT_REDUCTION_FACTOR, OverflowEscalation};
use crate::context::state::DEFAULT_MIN_PRESERVED_MESSAGES;
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Budget manager policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Most recent messages the trimmer never removes. Default: `2`.
    pub min_preserved_messages: usize,
    /// Budget multiplier applied on each provider overflow. Default: `0.3`.
    pub reduction_factor: f64,
    /// Ratio for the default estimator. Ignored when the host supplies its
    /// own estimator. Default: `4.0`.
    pub chars_per_token: f64,
    /// Tool outcome compaction settings.
    pub compaction: CompactionConfig,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            min_preserved_messages: DEFAULT_MIN_PRESERVED_MESSAGES,
            reduction_factor: DEFAULT_REDUCTION_FACTOR,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            compaction: CompactionConfig::default(),
        }
    }
}

impl BudgetConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigurationError::ConfigRead {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let config: BudgetConfig =
            serde_json::from_str(&contents).map_err(|e| ConfigurationError::ConfigParse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value is usable. Run at setup, never mid-session.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        CharRatioEstimator::new(self.chars_per_token)?;
        OverflowEscalation::new(self.reduction_factor)?;
        self.compaction.validate()
    }
}
