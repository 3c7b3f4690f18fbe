//! Error taxonomy for the budget manager.
//!
//! Configuration errors stop session creation. Overflow exhaustion ends the
//! current session only; the host is free to start a new one. Trimming and
//! compaction never fail.

use thiserror::Error;

/// A setup error: the manager cannot be built (or rebuilt) with these inputs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    /// The reserved system prompt and tool schema leave no room for history.
    #[error(
        "no room for conversation history: system prompt and tool schemas reserve {system_prompt_budget} of {max_tokens} tokens"
    )]
    NoAvailableBudget {
        max_tokens: usize,
        system_prompt_budget: usize,
    },

    #[error("invalid chars-per-token ratio {0}: must be finite and positive")]
    InvalidCharsPerToken(f64),

    #[error("invalid reduction factor {0}: must be in (0, 1)")]
    InvalidReductionFactor(f64),

    #[error("compaction preview length must be non-zero")]
    ZeroPreviewLength,

    #[error("failed to read config {path}: {reason}")]
    ConfigRead { path: String, reason: String },

    #[error("failed to parse config {path}: {reason}")]
    ConfigParse { path: String, reason: String },
}

/// The overflow escalation reached its terminal state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "context overflow persists with history already at its {min_preserved_messages}-message floor \
     ({overflow_count} overflows this session); start a new session"
)]
pub struct OverflowExhaustedError {
    pub min_preserved_messages: usize,
    pub overflow_count: usize,
}

/// A persisted state mapping could not be decoded.
#[derive(Debug, Error)]
#[error("invalid budget state mapping: {0}")]
pub struct StateError(#[from] serde_json::Error);

/// Any error surfaced by the manager's entry points.
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    OverflowExhausted(#[from] OverflowExhaustedError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl BudgetError {
    /// Whether this error ends the session.
    ///
    /// Configuration and state errors are raised before a session is usable,
    /// so only exhaustion is reported as terminal for a running session.
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, BudgetError::OverflowExhausted(_))
    }
}

impl OverflowExhaustedError {
    pub(crate) fn new(min_preserved_messages: usize, overflow_count: usize) -> Self {
        Self {
            min_preserved_messages,
            overflow_count,
        }
    }
}
