//! Tool outcome compaction: shrink oversized tool results to a bounded preview.
//!
//! Tool outcomes are the single largest context consumer in an agent loop. A
//! knowledge-base lookup or a data-provider response can easily run to tens
//! of kilobytes. When trimming alone cannot bring the history under budget,
//! oversized outcomes are cut to their first `preview_chars` characters
//! followed by a truncation marker.
//!
//! The preview is never empty. Replacing an outcome with a bare placeholder
//! leaves the model referring to facts it can no longer see.

use crate::context::estimator::TokenEstimator;
use crate::error::ConfigurationError;
use crate::{ContentBlock, Message};
use serde::{Deserialize, Serialize};

/// Prefix of the marker appended to compacted outcomes.
///
/// Both the marker writer and the "already compacted?" check reference this
/// constant so they can't drift out of sync.
pub const TRUNCATION_MARKER: &str = "[truncated:";

/// Default threshold: 250 tokens, ~1000 characters at the default ratio.
pub const DEFAULT_SIZE_THRESHOLD_TOKENS: usize = 250;

/// Default number of characters kept from a compacted outcome.
pub const DEFAULT_PREVIEW_CHARS: usize = 800;

/// Configuration for tool outcome compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Outcomes estimated above this many tokens are compacted.
    pub size_threshold_tokens: usize,
    /// Characters of the original content kept in the preview.
    pub preview_chars: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            size_threshold_tokens: DEFAULT_SIZE_THRESHOLD_TOKENS,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

impl CompactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size_threshold(mut self, tokens: usize) -> Self {
        self.size_threshold_tokens = tokens;
        self
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.preview_chars == 0 {
            return Err(ConfigurationError::ZeroPreviewLength);
        }
        Ok(())
    }
}

/// What a compaction pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Tool outcomes that were cut to a preview.
    pub compacted_blocks: usize,
    /// Characters removed across all compacted outcomes.
    pub freed_chars: usize,
}

impl CompactionReport {
    pub fn changed(&self) -> bool {
        self.compacted_blocks > 0
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "compaction: {} tool outcomes cut to preview, {} chars freed",
            self.compacted_blocks, self.freed_chars,
        )
    }
}

/// Compact every oversized tool outcome still present in `history`.
///
/// Outcomes already ending in the truncation trailer, and outcomes no longer
/// than the preview, are left alone, so a second pass is a no-op.
pub fn compact(
    mut history: Vec<Message>,
    config: &CompactionConfig,
    estimator: &dyn TokenEstimator,
) -> (Vec<Message>, CompactionReport) {
    let mut report = CompactionReport::default();

    for msg in &mut history {
        let needs_work = msg.blocks().iter().any(|b| {
            matches!(b, ContentBlock::ToolOutcome { content, .. }
                if should_compact(content, config, estimator))
        });
        if !needs_work {
            continue;
        }

        for block in msg.blocks_mut() {
            if let ContentBlock::ToolOutcome { content, .. } = block
                && should_compact(content, config, estimator)
            {
                let (preview, _) = preview_with_marker(content, config.preview_chars);
                report.freed_chars += content
                    .chars()
                    .count()
                    .saturating_sub(preview.chars().count());
                report.compacted_blocks += 1;
                *content = preview;
            }
        }
    }

    (history, report)
}

fn should_compact(content: &str, config: &CompactionConfig, estimator: &dyn TokenEstimator) -> bool {
    !is_compacted(content)
        && content.chars().nth(config.preview_chars).is_some()
        && estimator.estimate(content) > config.size_threshold_tokens
}

/// Whether `content` ends with the trailer written by [`preview_with_marker`].
///
/// Only the final line counts, and it must match the trailer exactly
/// (`[truncated: N of M chars omitted]`), so raw tool output that merely
/// mentions the marker text is still compacted.
pub fn is_compacted(content: &str) -> bool {
    let Some((_, trailer)) = content.rsplit_once('\n') else {
        return false;
    };
    let Some(counts) = trailer
        .strip_prefix(TRUNCATION_MARKER)
        .and_then(|rest| rest.strip_prefix(' '))
        .and_then(|rest| rest.strip_suffix(" chars omitted]"))
    else {
        return false;
    };
    counts
        .split_once(" of ")
        .is_some_and(|(omitted, total)| {
            omitted.parse::<usize>().is_ok() && total.parse::<usize>().is_ok()
        })
}

/// Keep the first `preview_chars` characters and append the marker.
///
/// Returns the new content and the number of characters omitted.
pub fn preview_with_marker(content: &str, preview_chars: usize) -> (String, usize) {
    let total = content.chars().count();
    let head: String = content.chars().take(preview_chars).collect();
    let omitted = total.saturating_sub(preview_chars);
    let preview = format!("{head}\n{TRUNCATION_MARKER} {omitted} of {total} chars omitted]");
    (preview, omitted)
}
