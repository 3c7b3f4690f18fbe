//! Overflow escalation: react to a provider-reported context overflow.
//!
//! A provider overflow after the history passed the local budget check means
//! the estimator under-counted against the provider's real tokenizer. The
//! escalation cuts the effective budget and lets the manager re-trim.
//!
//! ```text
//!   Normal ──overflow──▶ Reducing ──overflow at floor──▶ Exhausted
//!     ▲                   │  ▲  │
//!     └──model success────┘  └──┘ overflow above floor (cut again)
//! ```
//!
//! `Exhausted` is terminal: the session cannot shrink its history any
//! further and the host has to start a new one.

use crate::error::{ConfigurationError, OverflowExhaustedError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default budget multiplier applied on each overflow (a 70% cut).
pub const DEFAULT_REDUCTION_FACTOR: f64 = 0.3;

/// Escalation state.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowState {
    #[default]
    Normal,
    Reducing,
    Exhausted,
}

impl fmt::Display for OverflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowState::Normal => write!(f, "normal"),
            OverflowState::Reducing => write!(f, "reducing"),
            OverflowState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// The escalation state machine.
#[derive(Debug, Clone)]
pub struct OverflowEscalation {
    state: OverflowState,
    reduction_factor: f64,
    /// Overflows reported this session.
    overflow_count: usize,
}

impl Default for OverflowEscalation {
    fn default() -> Self {
        Self {
            state: OverflowState::Normal,
            reduction_factor: DEFAULT_REDUCTION_FACTOR,
            overflow_count: 0,
        }
    }
}

impl OverflowEscalation {
    /// Create an escalation with a custom reduction factor in `(0, 1)`.
    pub fn new(reduction_factor: f64) -> Result<Self, ConfigurationError> {
        if !(reduction_factor > 0.0 && reduction_factor < 1.0) {
            return Err(ConfigurationError::InvalidReductionFactor(reduction_factor));
        }
        Ok(Self {
            reduction_factor,
            ..Self::default()
        })
    }

    pub fn state(&self) -> OverflowState {
        self.state
    }

    pub fn reduction_factor(&self) -> f64 {
        self.reduction_factor
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count
    }

    /// Apply one reduction step to a budget, rounded to the nearest token.
    pub fn reduce(&self, budget: usize) -> usize {
        (budget as f64 * self.reduction_factor).round() as usize
    }

    /// Handle an overflow signal.
    ///
    /// `current_budget` is the effective budget the failed attempt was trimmed
    /// against. `at_floor` is whether the history is already down to the
    /// preserved-message floor, i.e. trimming cannot remove anything more.
    /// Returns the budget for the next attempt.
    pub fn on_overflow(
        &mut self,
        current_budget: usize,
        at_floor: bool,
        min_preserved: usize,
    ) -> Result<usize, OverflowExhaustedError> {
        self.overflow_count += 1;
        match self.state {
            OverflowState::Normal => {
                self.state = OverflowState::Reducing;
                Ok(self.reduce(current_budget))
            }
            OverflowState::Reducing if !at_floor => Ok(self.reduce(current_budget)),
            OverflowState::Reducing | OverflowState::Exhausted => {
                self.state = OverflowState::Exhausted;
                Err(OverflowExhaustedError::new(min_preserved, self.overflow_count))
            }
        }
    }

    /// A model call completed without overflow.
    pub fn record_success(&mut self) {
        if self.state == OverflowState::Reducing {
            self.state = OverflowState::Normal;
        }
    }

    /// Fail if the session is exhausted.
    pub fn ensure_active(&self, min_preserved: usize) -> Result<(), OverflowExhaustedError> {
        if self.state == OverflowState::Exhausted {
            return Err(OverflowExhaustedError::new(min_preserved, self.overflow_count));
        }
        Ok(())
    }

    pub(crate) fn restore(&mut self, state: OverflowState) {
        self.state = state;
    }
}

/// Whether a provider error string reports a context-length overflow.
///
/// Matches the phrasings used by the major chat-completion APIs. Hosts route
/// these to [`OverflowEscalation`] instead of their retry path.
pub fn is_context_overflow_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    [
        "context_length_exceeded",
        "context length exceeded",
        "maximum context length",
        "context window",
        "prompt is too long",
        "too many tokens",
        "input is too long",
        "request too large",
        "reduce the length of the messages",
    ]
    .iter()
    .any(|p| lower.contains(p))
}
