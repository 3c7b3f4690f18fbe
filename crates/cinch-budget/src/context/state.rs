//! Budget state and its flat persistence mapping.
//!
//! Only scalar counters are persisted; message content belongs to the host.
//! The mapping is a flat JSON object the host writes wherever it keeps
//! session data:
//!
//! ```json
//! {
//!   "call_count": 12,
//!   "max_tokens": 128000,
//!   "system_prompt_budget": 3100,
//!   "min_preserved_messages": 2,
//!   "overflow_state": "normal"
//! }
//! ```
//!
//! Restoring ignores unknown fields so older readers accept newer layouts.

use crate::context::overflow::OverflowState;
use crate::error::StateError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default number of most recent messages the trimmer never removes.
pub const DEFAULT_MIN_PRESERVED_MESSAGES: usize = 2;

fn default_min_preserved() -> usize {
    DEFAULT_MIN_PRESERVED_MESSAGES
}

/// Scalar counters of one conversation session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BudgetState {
    pub max_tokens: usize,
    pub system_prompt_budget: usize,
    #[serde(default = "default_min_preserved")]
    pub min_preserved_messages: usize,
    /// Model calls prepared so far this session.
    #[serde(default)]
    pub call_count: u64,
    #[serde(default)]
    pub overflow_state: OverflowState,
}

impl BudgetState {
    pub fn new(max_tokens: usize, system_prompt_budget: usize, min_preserved_messages: usize) -> Self {
        Self {
            max_tokens,
            system_prompt_budget,
            min_preserved_messages,
            call_count: 0,
            overflow_state: OverflowState::Normal,
        }
    }

    /// Export as a flat mapping.
    pub fn export(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("call_count".into(), self.call_count.into());
        map.insert("max_tokens".into(), self.max_tokens.into());
        map.insert(
            "system_prompt_budget".into(),
            self.system_prompt_budget.into(),
        );
        map.insert(
            "min_preserved_messages".into(),
            self.min_preserved_messages.into(),
        );
        map.insert(
            "overflow_state".into(),
            Value::String(self.overflow_state.to_string()),
        );
        map
    }

    /// Rebuild state from a mapping produced by [`export`](Self::export).
    pub fn restore(mapping: &Map<String, Value>) -> Result<Self, StateError> {
        Ok(serde_json::from_value(Value::Object(mapping.clone()))?)
    }
}
