//! Budget calculation: how much of the model's context window is left for
//! conversation history once the system prompt and tool schemas are paid for.
//!
//! The allocation is computed once per session and cached in the manager.
//! It is recomputed only when the host changes the system prompt or the
//! active tool set and asks for it explicitly.

use crate::Message;
use crate::context::estimator::{TokenEstimator, saturating_total};
use crate::error::ConfigurationError;

/// Result of a budget calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetAllocation {
    /// Total model context window in tokens.
    pub max_tokens: usize,
    /// Tokens reserved for the system prompt plus tool schemas.
    pub system_prompt_budget: usize,
    /// Tokens left for conversation history.
    pub available_budget: usize,
}

impl BudgetAllocation {
    /// Build an allocation from an already-known reservation.
    ///
    /// Fails when the reservation leaves no room for history.
    pub fn from_reserved(
        max_tokens: usize,
        system_prompt_budget: usize,
    ) -> Result<Self, ConfigurationError> {
        if system_prompt_budget >= max_tokens {
            return Err(ConfigurationError::NoAvailableBudget {
                max_tokens,
                system_prompt_budget,
            });
        }
        Ok(Self {
            max_tokens,
            system_prompt_budget,
            available_budget: max_tokens - system_prompt_budget,
        })
    }
}

/// Compute the history budget for a model context window.
///
/// `system_prompt_budget = estimate(system_prompt) + estimate(tool_schema)`,
/// `available_budget = max_tokens - system_prompt_budget`.
pub fn calculate(
    max_tokens: usize,
    system_prompt: &str,
    tool_schema: &str,
    estimator: &dyn TokenEstimator,
) -> Result<BudgetAllocation, ConfigurationError> {
    let system_prompt_budget = estimator
        .estimate(system_prompt)
        .saturating_add(estimator.estimate(tool_schema));
    BudgetAllocation::from_reserved(max_tokens, system_prompt_budget)
}

/// Estimate the total tokens of a history, filling per-message caches.
pub fn history_tokens(messages: &[Message], estimator: &dyn TokenEstimator) -> usize {
    saturating_total(messages.iter().map(|m| m.estimated_tokens(estimator)))
}

/// Snapshot of history usage against the effective budget.
#[derive(Debug, Clone, Copy)]
pub struct ContextUsage {
    /// Estimated tokens in the history.
    pub estimated_tokens: usize,
    /// Budget the history is measured against.
    pub budget: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    pub fn measure(messages: &[Message], budget: usize, estimator: &dyn TokenEstimator) -> Self {
        let estimated_tokens = history_tokens(messages, estimator);
        let usage_pct = if budget > 0 {
            estimated_tokens as f64 / budget as f64
        } else {
            1.0
        };
        Self {
            estimated_tokens,
            budget,
            usage_pct,
        }
    }

    pub fn fits(&self) -> bool {
        self.estimated_tokens <= self.budget
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "history: ~{} tokens ({:.0}% of {})",
            self.estimated_tokens,
            self.usage_pct * 100.0,
            self.budget,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::estimator::CharRatioEstimator;

    #[test]
    fn subtracts_prompt_and_schema() {
        let e = CharRatioEstimator::default();
        let alloc = calculate(1000, &"p".repeat(400), &"s".repeat(400), &e).unwrap();
        assert_eq!(alloc.system_prompt_budget, 200);
        assert_eq!(alloc.available_budget, 800);
        assert_eq!(alloc.max_tokens, 1000);
    }

    #[test]
    fn empty_prompt_reserves_nothing() {
        let e = CharRatioEstimator::default();
        let alloc = calculate(500, "", "", &e).unwrap();
        assert_eq!(alloc.available_budget, 500);
    }

    #[test]
    fn no_room_is_configuration_error() {
        let e = CharRatioEstimator::default();
        let err = calculate(100, &"p".repeat(400), "", &e).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::NoAvailableBudget {
                max_tokens: 100,
                system_prompt_budget: 100,
            }
        );
        assert!(calculate(0, "", "", &e).is_err());
    }

    #[test]
    fn oversized_tokenizer_counts_saturate() {
        let huge = |_: &str| usize::MAX;
        let err = calculate(1000, "prompt", "schema", &huge).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::NoAvailableBudget {
                max_tokens: 1000,
                system_prompt_budget: usize::MAX,
            }
        );

        let msgs = vec![Message::user("a"), Message::user("b")];
        assert_eq!(history_tokens(&msgs, &huge), usize::MAX);
        assert!(!ContextUsage::measure(&msgs, 100, &huge).fits());
    }

    #[test]
    fn usage_snapshot() {
        let e = CharRatioEstimator::default();
        let msgs = vec![Message::user("a".repeat(400)), Message::user("b".repeat(400))];
        let usage = ContextUsage::measure(&msgs, 400, &e);
        assert_eq!(usage.estimated_tokens, 200);
        assert!(usage.fits());
        assert!((usage.usage_pct - 0.5).abs() < f64::EPSILON);
        assert!(usage.to_log_string().contains("50% of 400"));

        let zero = ContextUsage::measure(&msgs, 0, &e);
        assert!(!zero.fits());
        assert_eq!(zero.usage_pct, 1.0);
    }
}
