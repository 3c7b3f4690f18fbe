//! The per-session budget manager and the host hook seam.
//!
//! A host agent loop owns one [`BudgetManager`] per conversation session and
//! calls it through the [`ModelCallHook`] trait:
//!
//! - [`before_model_call`](ModelCallHook::before_model_call): trim (and if
//!   needed compact) the history to the effective budget.
//! - [`on_context_overflow`](ModelCallHook::on_context_overflow): the
//!   provider rejected the request as too long; cut the budget and shrink the
//!   history again, or fail the session.
//! - [`on_model_success`](ModelCallHook::on_model_success): the call went
//!   through.
//!
//! The manager is not shared between sessions and takes `&mut self` at every
//! entry point, so no locking is involved.

use crate::config::BudgetConfig;
use crate::context::budget::{self, BudgetAllocation, ContextUsage};
use crate::context::compactor::{self, CompactionConfig, CompactionReport};
use crate::context::estimator::{CharRatioEstimator, TokenEstimator};
use crate::context::overflow::{OverflowEscalation, OverflowState};
use crate::context::state::BudgetState;
use crate::context::trimmer::{self, TrimDecision};
use crate::error::{BudgetError, ConfigurationError};
use crate::Message;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, info, warn};

// ── ModelCallHook trait ────────────────────────────────────────────

/// Extension points a host agent runtime calls around each model request.
///
/// # Example
///
/// ```ignore
/// let history = hook.before_model_call(history)?;
/// let history = match client.complete(&history).await {
///     Err(e) if is_context_overflow_error(&e) => hook.on_context_overflow(history)?,
///     Ok(reply) => {
///         hook.on_model_success();
///         history
///     }
///     Err(e) => return Err(e.into()),
/// };
/// ```
pub trait ModelCallHook {
    /// Transform the history about to be sent to the model.
    fn before_model_call(&mut self, history: Vec<Message>) -> Result<Vec<Message>, BudgetError>;

    /// The provider reported a context overflow for `history`. Returns the
    /// history to retry with.
    fn on_context_overflow(&mut self, history: Vec<Message>)
    -> Result<Vec<Message>, BudgetError>;

    /// The model call completed without overflow.
    fn on_model_success(&mut self) {}
}

// ── BudgetManager ──────────────────────────────────────────────────

/// Keeps one session's history inside the model's context budget.
///
/// Build with [`BudgetManager::builder`] (or [`BudgetManager::new`] for the
/// defaults). The history budget is computed once from the system prompt and
/// tool schemas and only recomputed on [`recompute_budget`](Self::recompute_budget).
pub struct BudgetManager {
    estimator: Box<dyn TokenEstimator>,
    allocation: BudgetAllocation,
    /// Budget the next trim pass uses; below `available_budget` after overflows.
    effective_budget: usize,
    min_preserved_messages: usize,
    call_count: u64,
    escalation: OverflowEscalation,
    compaction: CompactionConfig,
    system_prompt: String,
    tool_schema: String,
    last_trim: Option<TrimDecision>,
    last_compaction: Option<CompactionReport>,
}

impl fmt::Debug for BudgetManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetManager")
            .field("estimator", &self.estimator.name())
            .field("allocation", &self.allocation)
            .field("effective_budget", &self.effective_budget)
            .field("min_preserved_messages", &self.min_preserved_messages)
            .field("call_count", &self.call_count)
            .field("overflow_state", &self.escalation.state())
            .finish_non_exhaustive()
    }
}

impl BudgetManager {
    /// A manager with the default estimator, floor, and policy, and no
    /// system prompt reservation.
    pub fn new(max_tokens: usize) -> Result<Self, ConfigurationError> {
        Self::builder(max_tokens).build()
    }

    pub fn builder(max_tokens: usize) -> BudgetManagerBuilder {
        BudgetManagerBuilder::new(max_tokens)
    }

    pub fn max_tokens(&self) -> usize {
        self.allocation.max_tokens
    }

    pub fn system_prompt_budget(&self) -> usize {
        self.allocation.system_prompt_budget
    }

    /// History budget before any overflow reduction.
    pub fn available_budget(&self) -> usize {
        self.allocation.available_budget
    }

    /// History budget the next trim pass uses.
    pub fn effective_budget(&self) -> usize {
        self.effective_budget
    }

    pub fn min_preserved_messages(&self) -> usize {
        self.min_preserved_messages
    }

    /// Change the preserved-message floor, e.g. to re-apply a host override
    /// after [`restore_state`](Self::restore_state).
    pub fn set_min_preserved_messages(&mut self, n: usize) {
        if n != self.min_preserved_messages {
            debug!(
                "Preserved-message floor {} -> {}",
                self.min_preserved_messages, n
            );
        }
        self.min_preserved_messages = n;
    }

    pub fn call_count(&self) -> u64 {
        self.call_count
    }

    pub fn overflow_state(&self) -> OverflowState {
        self.escalation.state()
    }

    pub fn estimator(&self) -> &dyn TokenEstimator {
        &*self.estimator
    }

    /// Decision from the most recent trim pass.
    pub fn last_trim(&self) -> Option<&TrimDecision> {
        self.last_trim.as_ref()
    }

    /// Report from the most recent compaction pass.
    pub fn last_compaction(&self) -> Option<&CompactionReport> {
        self.last_compaction.as_ref()
    }

    /// Measure `history` against the effective budget.
    pub fn usage(&self, history: &[Message]) -> ContextUsage {
        ContextUsage::measure(history, self.effective_budget, &*self.estimator)
    }

    /// Snapshot of the scalar counters.
    pub fn budget_state(&self) -> BudgetState {
        BudgetState {
            max_tokens: self.allocation.max_tokens,
            system_prompt_budget: self.allocation.system_prompt_budget,
            min_preserved_messages: self.min_preserved_messages,
            call_count: self.call_count,
            overflow_state: self.escalation.state(),
        }
    }

    /// Recompute the budget after the system prompt or active tool set changed.
    ///
    /// On error the previous allocation stays in place.
    pub fn recompute_budget(
        &mut self,
        system_prompt: impl Into<String>,
        tool_schema: impl Into<String>,
    ) -> Result<BudgetAllocation, ConfigurationError> {
        let system_prompt = system_prompt.into();
        let tool_schema = tool_schema.into();
        let allocation = budget::calculate(
            self.allocation.max_tokens,
            &system_prompt,
            &tool_schema,
            &*self.estimator,
        )?;
        info!(
            "Budget recomputed: {} reserved, {} available (was {})",
            allocation.system_prompt_budget,
            allocation.available_budget,
            self.allocation.available_budget,
        );
        self.system_prompt = system_prompt;
        self.tool_schema = tool_schema;
        self.apply_allocation(allocation);
        Ok(allocation)
    }

    /// Export the scalar counters as a flat mapping for persistence.
    ///
    /// Call between turns only.
    pub fn export_state(&self) -> Map<String, Value> {
        self.budget_state().export()
    }

    /// Restore counters exported by a previous session.
    ///
    /// The system prompt budget is always recomputed from this manager's
    /// current prompt and tool schemas. A restored value that differs is
    /// logged and replaced, not treated as an error.
    pub fn restore_state(&mut self, mapping: &Map<String, Value>) -> Result<(), BudgetError> {
        let restored = BudgetState::restore(mapping)?;
        let allocation = budget::calculate(
            restored.max_tokens,
            &self.system_prompt,
            &self.tool_schema,
            &*self.estimator,
        )?;
        if allocation.system_prompt_budget != restored.system_prompt_budget {
            info!(
                "Restored system prompt budget {} differs from current {}; recomputing",
                restored.system_prompt_budget, allocation.system_prompt_budget,
            );
        }

        self.min_preserved_messages = restored.min_preserved_messages;
        self.call_count = restored.call_count;
        self.escalation.restore(restored.overflow_state);
        self.apply_allocation(allocation);
        debug!(
            "State restored: call_count={}, overflow_state={}, effective budget {}",
            self.call_count,
            self.escalation.state(),
            self.effective_budget,
        );
        Ok(())
    }

    fn apply_allocation(&mut self, allocation: BudgetAllocation) {
        self.allocation = allocation;
        self.effective_budget = match self.escalation.state() {
            OverflowState::Normal => allocation.available_budget,
            OverflowState::Reducing | OverflowState::Exhausted => {
                self.escalation.reduce(allocation.available_budget)
            }
        };
    }

    /// Trim against the effective budget, then compact if still over.
    fn fit(&mut self, history: Vec<Message>) -> Vec<Message> {
        let (history, decision) = trimmer::trim(
            history,
            self.effective_budget,
            self.min_preserved_messages,
            &*self.estimator,
        );
        if decision.irreversible() {
            info!("{}", decision.to_log_string());
        } else {
            debug!("{}", decision.to_log_string());
        }

        let (history, report) = if decision.over_budget() {
            compactor::compact(history, &self.compaction, &*self.estimator)
        } else {
            (history, CompactionReport::default())
        };
        if report.changed() {
            info!("{}", report.to_log_string());
        }

        let usage = self.usage(&history);
        if !usage.fits() {
            warn!(
                "History exceeds budget after trimming and compaction ({})",
                usage.to_log_string()
            );
        }

        self.last_trim = Some(decision);
        self.last_compaction = Some(report);
        history
    }
}

impl ModelCallHook for BudgetManager {
    fn before_model_call(&mut self, history: Vec<Message>) -> Result<Vec<Message>, BudgetError> {
        self.escalation.ensure_active(self.min_preserved_messages)?;
        self.call_count += 1;
        debug!(
            "Model call {}: {} messages, effective budget {}",
            self.call_count,
            history.len(),
            self.effective_budget,
        );
        Ok(self.fit(history))
    }

    fn on_context_overflow(
        &mut self,
        history: Vec<Message>,
    ) -> Result<Vec<Message>, BudgetError> {
        let at_floor =
            !trimmer::can_trim_further(&history, self.min_preserved_messages, &*self.estimator);
        let previous = self.effective_budget;
        match self
            .escalation
            .on_overflow(previous, at_floor, self.min_preserved_messages)
        {
            Ok(next) => {
                warn!(
                    "Provider reported context overflow ({} messages); budget {} -> {}",
                    history.len(),
                    previous,
                    next,
                );
                self.effective_budget = next;
                Ok(self.fit(history))
            }
            Err(e) => {
                warn!("Context overflow escalation exhausted: {e}");
                Err(e.into())
            }
        }
    }

    fn on_model_success(&mut self) {
        if self.escalation.state() == OverflowState::Reducing {
            debug!(
                "Model call succeeded at reduced budget {}",
                self.effective_budget
            );
        }
        self.escalation.record_success();
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Builder for [`BudgetManager`].
///
/// ```ignore
/// let manager = BudgetManager::builder(128_000)
///     .with_system_prompt(prompt)
///     .with_tool_schema(serde_json::to_string(&tool_defs)?)
///     .with_min_preserved_messages(4)
///     .build()?;
/// ```
pub struct BudgetManagerBuilder {
    max_tokens: usize,
    estimator: Option<Box<dyn TokenEstimator>>,
    min_preserved_messages: Option<usize>,
    system_prompt: String,
    tool_schema: String,
    config: BudgetConfig,
}

impl BudgetManagerBuilder {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            estimator: None,
            min_preserved_messages: None,
            system_prompt: String::new(),
            tool_schema: String::new(),
            config: BudgetConfig::default(),
        }
    }

    /// Substitute the token estimator (e.g. a provider-exact tokenizer).
    pub fn with_estimator(mut self, estimator: impl TokenEstimator + 'static) -> Self {
        self.estimator = Some(Box::new(estimator));
        self
    }

    /// Override the preserved-message floor from the config.
    pub fn with_min_preserved_messages(mut self, n: usize) -> Self {
        self.min_preserved_messages = Some(n);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Serialized tool definitions sent alongside the history.
    pub fn with_tool_schema(mut self, schema: impl Into<String>) -> Self {
        self.tool_schema = schema.into();
        self
    }

    pub fn with_config(mut self, config: BudgetConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and compute the budget.
    pub fn build(self) -> Result<BudgetManager, ConfigurationError> {
        self.config.validate()?;
        let estimator: Box<dyn TokenEstimator> = match self.estimator {
            Some(e) => e,
            None => Box::new(CharRatioEstimator::new(self.config.chars_per_token)?),
        };
        let allocation = budget::calculate(
            self.max_tokens,
            &self.system_prompt,
            &self.tool_schema,
            &*estimator,
        )?;
        let escalation = OverflowEscalation::new(self.config.reduction_factor)?;
        let min_preserved_messages = self
            .min_preserved_messages
            .unwrap_or(self.config.min_preserved_messages);

        info!(
            "Budget manager ready: {} max tokens, {} reserved, {} for history ({} estimator)",
            allocation.max_tokens,
            allocation.system_prompt_budget,
            allocation.available_budget,
            estimator.name(),
        );

        Ok(BudgetManager {
            estimator,
            allocation,
            effective_budget: allocation.available_budget,
            min_preserved_messages,
            call_count: 0,
            escalation,
            compaction: self.config.compaction,
            system_prompt: self.system_prompt,
            tool_schema: self.tool_schema,
            last_trim: None,
            last_compaction: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContentBlock;

    fn sized(tokens: usize) -> Message {
        Message::user("x".repeat(tokens * 4))
    }

    #[test]
    fn builder_computes_allocation() {
        let manager = BudgetManager::builder(1000)
            .with_system_prompt("p".repeat(600))
            .with_tool_schema("s".repeat(200))
            .build()
            .unwrap();
        assert_eq!(manager.system_prompt_budget(), 200);
        assert_eq!(manager.available_budget(), 800);
        assert_eq!(manager.effective_budget(), 800);
        assert_eq!(manager.min_preserved_messages(), 2);
        assert_eq!(manager.overflow_state(), OverflowState::Normal);
    }

    #[test]
    fn oversized_prompt_fails_construction() {
        let err = BudgetManager::builder(100)
            .with_system_prompt("p".repeat(400))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::NoAvailableBudget { .. }));
    }

    #[test]
    fn invalid_config_fails_construction() {
        let config = BudgetConfig {
            chars_per_token: 0.0,
            ..BudgetConfig::default()
        };
        let err = BudgetManager::builder(1000).with_config(config).build().unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidCharsPerToken(0.0));
    }

    #[test]
    fn before_model_call_counts_and_trims() {
        let mut manager = BudgetManager::new(100).unwrap();
        let history = vec![sized(60), sized(30), sized(30)];
        let out = manager.before_model_call(history).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(manager.call_count(), 1);
        assert!(manager.last_trim().unwrap().irreversible());
        assert!(!manager.last_compaction().unwrap().changed());
    }

    #[test]
    fn compacts_when_floor_leaves_history_over_budget() {
        let mut manager = BudgetManager::new(300).unwrap();
        let history = vec![
            Message::assistant_tool_call("c1", "kb_search", r#"{"q":"dividend policy"}"#),
            Message::tool_result("c1", "r".repeat(4000)),
        ];
        let out = manager.before_model_call(history).unwrap();
        assert_eq!(out.len(), 2);
        assert!(manager.last_compaction().unwrap().changed());
        match &out[1].blocks()[0] {
            ContentBlock::ToolOutcome { content, .. } => {
                assert!(content.starts_with(&"r".repeat(800)));
            }
            other => panic!("unexpected block {other:?}"),
        }
        assert!(manager.usage(&out).fits());
    }

    #[test]
    fn custom_estimator_is_used() {
        let words = |text: &str| text.split_whitespace().count();
        let mut manager = BudgetManager::builder(3)
            .with_estimator(words)
            .with_min_preserved_messages(1)
            .build()
            .unwrap();
        assert_eq!(manager.estimator().name(), "custom");
        let history = vec![
            Message::user("one two three"),
            Message::user("four five"),
        ];
        let out = manager.before_model_call(history).unwrap();
        assert_eq!(out, vec![Message::user("four five")]);
    }

    #[test]
    fn overflow_reduces_then_exhausts() {
        let mut manager = BudgetManager::new(1000).unwrap();
        let history = vec![sized(100), sized(100), sized(100)];
        let history = manager.before_model_call(history).unwrap();
        assert_eq!(history.len(), 3);

        let history = manager.on_context_overflow(history).unwrap();
        assert_eq!(manager.overflow_state(), OverflowState::Reducing);
        assert_eq!(manager.effective_budget(), 300);
        assert_eq!(history.len(), 3);

        // Not at the floor yet: reduce again and trim to the floor.
        let history = manager.on_context_overflow(history).unwrap();
        assert_eq!(manager.effective_budget(), 90);
        assert_eq!(history.len(), 2);

        let err = manager.on_context_overflow(history.clone()).unwrap_err();
        assert!(err.is_session_terminal());
        assert_eq!(manager.overflow_state(), OverflowState::Exhausted);
        assert!(manager.before_model_call(history).is_err());
    }

    #[test]
    fn success_resets_state_but_keeps_reduced_budget() {
        let mut manager = BudgetManager::new(1000).unwrap();
        let history = manager.on_context_overflow(vec![sized(10)]).unwrap();
        manager.on_model_success();
        assert_eq!(manager.overflow_state(), OverflowState::Normal);
        assert_eq!(manager.effective_budget(), 300);
        assert!(manager.on_context_overflow(history).is_ok());
    }

    #[test]
    fn recompute_budget_replaces_allocation() {
        let mut manager = BudgetManager::new(1000).unwrap();
        let alloc = manager.recompute_budget("p".repeat(400), "").unwrap();
        assert_eq!(alloc.available_budget, 900);
        assert_eq!(manager.effective_budget(), 900);

        let err = manager.recompute_budget("p".repeat(8000), "").unwrap_err();
        assert!(matches!(err, ConfigurationError::NoAvailableBudget { .. }));
        assert_eq!(manager.available_budget(), 900);
    }

    #[test]
    fn restore_with_stale_prompt_budget_recomputes() {
        let mut manager = BudgetManager::builder(1000)
            .with_system_prompt("p".repeat(400))
            .build()
            .unwrap();
        let mut state = manager.budget_state();
        state.system_prompt_budget = 350;
        state.call_count = 9;
        manager.restore_state(&state.export()).unwrap();
        assert_eq!(manager.system_prompt_budget(), 100);
        assert_eq!(manager.call_count(), 9);
    }

    #[test]
    fn restore_reducing_applies_one_reduction() {
        let mut manager = BudgetManager::new(1000).unwrap();
        let mut state = manager.budget_state();
        state.overflow_state = OverflowState::Reducing;
        manager.restore_state(&state.export()).unwrap();
        assert_eq!(manager.effective_budget(), 300);
    }

    #[test]
    fn floor_override_after_restore() {
        let mut manager = BudgetManager::new(1000).unwrap();
        let mut state = manager.budget_state();
        state.min_preserved_messages = 5;
        manager.restore_state(&state.export()).unwrap();
        assert_eq!(manager.min_preserved_messages(), 5);

        manager.set_min_preserved_messages(1);
        assert_eq!(manager.min_preserved_messages(), 1);
        assert_eq!(manager.export_state()["min_preserved_messages"], 1);
    }

    #[test]
    fn restore_malformed_mapping_fails() {
        let mut manager = BudgetManager::new(1000).unwrap();
        let mut map = Map::new();
        map.insert("max_tokens".into(), Value::String("many".into()));
        let err = manager.restore_state(&map).unwrap_err();
        assert!(matches!(err, BudgetError::State(_)));
    }

    #[test]
    fn debug_omits_estimator_internals() {
        let manager = BudgetManager::new(1000).unwrap();
        let s = format!("{manager:?}");
        assert!(s.contains("char-ratio"));
        assert!(s.contains("effective_budget"));
    }
}
