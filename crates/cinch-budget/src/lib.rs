//! Conversation budget manager for LLM tool-use agents.
//!
//! `cinch-budget` keeps the conversation history sent to a model inside a
//! fixed token budget without breaking the conversation apart. The core
//! abstraction is the [`BudgetManager`](manager::BudgetManager), a
//! per-session object the host agent loop calls at two points:
//!
//! - **Before every model call**, the history is trimmed oldest-first down to
//!   the budget (never below the preserved-message floor, never splitting a
//!   tool invocation from its outcome). If that is not enough, oversized tool
//!   outcomes are compacted to a bounded preview.
//! - **After a provider-reported context overflow**, the effective budget is
//!   cut and the history re-trimmed. A second overflow with nothing left to
//!   trim ends the session with [`OverflowExhaustedError`].
//!
//! The manager performs no I/O. Its scalar counters can be exported to a flat
//! JSON mapping and restored in a later process.
//!
//! # Getting started
//!
//! ```ignore
//! use cinch_budget::prelude::*;
//!
//! let mut manager = BudgetManager::builder(8_192)
//!     .with_system_prompt("You are a market data assistant.")
//!     .with_tool_schema(tool_schema_json)
//!     .build()?;
//!
//! let history = manager.before_model_call(history)?;
//! match client.complete(&history).await {
//!     Err(e) if is_context_overflow_error(&e) => {
//!         let history = manager.on_context_overflow(history)?;
//!         // retry with the shrunk history
//!     }
//!     Ok(_) => manager.on_model_success(),
//!     Err(e) => return Err(e.into()),
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |---|---|
//! | [`context`] | Estimation, budget calculation, trimming, compaction, overflow escalation, state |
//! | [`manager`] | The per-session [`BudgetManager`](manager::BudgetManager) and the [`ModelCallHook`](manager::ModelCallHook) seam |
//! | [`config`] | JSON-loadable policy defaults |
//! | [`error`] | Error taxonomy |

pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod prelude;

use crate::context::estimator::{TokenEstimator, saturating_total};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;

pub use error::{BudgetError, ConfigurationError, OverflowExhaustedError, StateError};

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation history.
///
/// The system prompt is not part of the history; its cost is reserved by the
/// [`budget`](context::budget) calculator instead.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// One block of message content.
///
/// A `ToolInvocation` and the `ToolOutcome` with the same `call_id` form an
/// atomic pair: the trimmer keeps or drops them together.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolInvocation {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    ToolOutcome {
        call_id: String,
        content: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_invocation(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        ContentBlock::ToolInvocation {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_outcome(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolOutcome {
            call_id: call_id.into(),
            content: content.into(),
        }
    }

    /// The call ID for tool blocks, `None` for text.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { .. } => None,
            ContentBlock::ToolInvocation { call_id, .. }
            | ContentBlock::ToolOutcome { call_id, .. } => Some(call_id),
        }
    }

    /// Estimated token cost of this block.
    ///
    /// Invocations are charged for the tool name plus the raw arguments.
    pub fn estimate(&self, estimator: &dyn TokenEstimator) -> usize {
        match self {
            ContentBlock::Text { text } => estimator.estimate(text),
            ContentBlock::ToolInvocation {
                name, arguments, ..
            } => estimator
                .estimate(name)
                .saturating_add(estimator.estimate(arguments)),
            ContentBlock::ToolOutcome { content, .. } => estimator.estimate(content),
        }
    }
}

/// A message in the conversation history.
///
/// The estimated token count is cached the first time it is computed and
/// dropped whenever content is mutated through [`blocks_mut`](Self::blocks_mut).
/// The cache is not serialized and does not take part in equality.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    content: Vec<ContentBlock>,
    #[serde(skip)]
    token_cache: OnceCell<usize>,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.role == other.role && self.content == other.content
    }
}

impl Eq for Message {}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            token_cache: OnceCell::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![ContentBlock::text(text)])
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, vec![ContentBlock::text(text)])
    }

    /// An assistant message carrying a single tool invocation.
    pub fn assistant_tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::new(
            MessageRole::Assistant,
            vec![ContentBlock::tool_invocation(call_id, name, arguments)],
        )
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            MessageRole::Tool,
            vec![ContentBlock::tool_outcome(call_id, content)],
        )
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        &self.content
    }

    /// Mutable access to the content blocks. Clears the cached estimate.
    pub fn blocks_mut(&mut self) -> &mut Vec<ContentBlock> {
        self.token_cache.take();
        &mut self.content
    }

    /// Estimated token count, computed once and cached.
    pub fn estimated_tokens(&self, estimator: &dyn TokenEstimator) -> usize {
        *self
            .token_cache
            .get_or_init(|| saturating_total(self.content.iter().map(|b| b.estimate(estimator))))
    }

    /// The cached estimate, if one has been computed.
    pub fn cached_tokens(&self) -> Option<usize> {
        self.token_cache.get().copied()
    }

    /// Call IDs of tool invocations in this message.
    pub fn invocation_ids(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolInvocation { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
    }

    /// Call IDs of tool outcomes in this message.
    pub fn outcome_ids(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolOutcome { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
    }
}
