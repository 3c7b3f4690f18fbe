//! Convenience re-exports for common `cinch-budget` types.
//!
//! Meant to be glob-imported by host agent loops:
//!
//! ```ignore
//! use cinch_budget::prelude::*;
//! ```
//!
//! Lower-level pieces (the free `trim` / `compact` functions, the persisted
//! [`BudgetState`](crate::context::BudgetState) layout) stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ContentBlock, Message, MessageRole};

// ── Manager ─────────────────────────────────────────────────────────
pub use crate::config::BudgetConfig;
pub use crate::manager::{BudgetManager, BudgetManagerBuilder, ModelCallHook};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{
    CharRatioEstimator, CompactionConfig, ContextUsage, OverflowState, TokenEstimator,
    is_context_overflow_error,
};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{BudgetError, ConfigurationError, OverflowExhaustedError, StateError};
