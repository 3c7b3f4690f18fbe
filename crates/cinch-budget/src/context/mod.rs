//! Context budget management: estimation, trimming, compaction, escalation.
//!
//! The context window is the scarcest resource in any LLM agent. This module
//! provides the building blocks the [`BudgetManager`](crate::manager::BudgetManager)
//! composes before every model call:
//!
//! 1. **[`estimator`]**: text → estimated tokens. Pluggable; defaults to
//!    characters / 4, rounded up.
//!
//! 2. **[`budget`]**: model context window minus the system prompt and tool
//!    schema reservation gives the history budget.
//!
//! 3. **[`trimmer`]**: drops the oldest messages until the history fits,
//!    keeping a preserved-message floor and tool invocation/outcome pairs.
//!
//! 4. **[`compactor`]**: when trimming is not enough, cuts oversized tool
//!    outcomes to a bounded preview.
//!
//! 5. **[`overflow`]**: reacts to provider-reported overflows by cutting the
//!    effective budget, and gives up once nothing more can be trimmed.
//!
//! 6. **[`state`]**: the scalar counters persisted between sessions.
//!
//! Everything here is synchronous and free of I/O.

pub mod budget;
pub mod compactor;
pub mod estimator;
pub mod overflow;
pub mod state;
pub mod trimmer;

// Re-export commonly used items at the module level.
pub use budget::{BudgetAllocation, ContextUsage};
pub use compactor::{CompactionConfig, CompactionReport};
pub use estimator::{CharRatioEstimator, DEFAULT_CHARS_PER_TOKEN, TokenEstimator};
pub use overflow::{OverflowEscalation, OverflowState, is_context_overflow_error};
pub use state::BudgetState;
pub use trimmer::TrimDecision;
