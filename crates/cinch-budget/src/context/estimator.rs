//! Token estimation: a cheap, pluggable text → token count mapping.
//!
//! The default [`CharRatioEstimator`] divides the character count by a fixed
//! ratio and rounds up. Hosts with access to a provider-exact tokenizer can
//! substitute it through the [`TokenEstimator`] trait, or pass any
//! `Fn(&str) -> usize` closure.

use crate::error::ConfigurationError;

/// Default characters per token. Four is the common rule of thumb across
/// provider tokenizers for English text.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Maps text to an estimated token count.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;

    /// Short name for logs.
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> TokenEstimator for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn estimate(&self, text: &str) -> usize {
        self(text)
    }
}

/// Sum token counts, clamping at `usize::MAX` instead of overflowing.
///
/// A tiny ratio or a custom tokenizer can report counts near `usize::MAX`.
pub fn saturating_total(counts: impl IntoIterator<Item = usize>) -> usize {
    counts.into_iter().fold(0, usize::saturating_add)
}

/// Estimates tokens as `ceil(chars / chars_per_token)`.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: f64,
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl CharRatioEstimator {
    /// Build an estimator with a custom ratio, e.g. one calibrated from
    /// provider usage reports.
    pub fn new(chars_per_token: f64) -> Result<Self, ConfigurationError> {
        if !chars_per_token.is_finite() || chars_per_token <= 0.0 {
            return Err(ConfigurationError::InvalidCharsPerToken(chars_per_token));
        }
        Ok(Self { chars_per_token })
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        (chars as f64 / self.chars_per_token).ceil() as usize
    }

    fn name(&self) -> &str {
        "char-ratio"
    }
}
