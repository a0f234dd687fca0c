//! Response-length budgeting with a pluggable token estimator.
//!
//! Early turns set context and get the largest budget; later refinement
//! turns are compressed.

use serde::{Deserialize, Serialize};

use crate::config::MemoryLimits;

/// Trait for estimating token counts from text.
pub trait TokenEstimator {
    /// Estimate the number of tokens in the given text.
    fn estimate(&self, text: &str) -> u32;

    /// Tokens needed for `words` words of output.
    fn tokens_for_words(&self, words: u32) -> u32;

    /// Estimator name for logging.
    fn name(&self) -> &str;
}

/// Word-count based estimator (words × factor).
///
/// ~1.3 tokens per word for English text.
#[derive(Debug, Clone)]
pub struct WordCountEstimator {
    pub factor: f64,
}

impl Default for WordCountEstimator {
    fn default() -> Self {
        Self { factor: 1.3 }
    }
}

impl TokenEstimator for WordCountEstimator {
    fn estimate(&self, text: &str) -> u32 {
        self.tokens_for_words(text.split_whitespace().count() as u32)
    }

    fn tokens_for_words(&self, words: u32) -> u32 {
        (words as f64 * self.factor).ceil() as u32
    }

    fn name(&self) -> &str {
        "word_count"
    }
}

/// Per-turn word budget inside a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBudget {
    pub first_turn_words: u32,
    pub early_turn_words: u32,
    pub late_turn_words: u32,
    pub early_until_turn: u32,
}

/// Slack on top of the estimated tokens so answers are not cut mid-sentence.
const TOKEN_HEADROOM: u32 = 64;

impl ResponseBudget {
    pub fn from_limits(limits: &MemoryLimits) -> Self {
        Self {
            first_turn_words: limits.first_turn_words,
            early_turn_words: limits.early_turn_words,
            late_turn_words: limits.late_turn_words,
            early_until_turn: limits.early_until_turn,
        }
    }

    /// Non-increasing in `turn_index`.
    pub fn words_for_turn(&self, turn_index: u32) -> u32 {
        if turn_index == 0 {
            self.first_turn_words
        } else if turn_index <= self.early_until_turn {
            self.early_turn_words.min(self.first_turn_words)
        } else {
            self.late_turn_words
                .min(self.early_turn_words)
                .min(self.first_turn_words)
        }
    }

    pub fn max_tokens_for_turn(&self, turn_index: u32, estimator: &dyn TokenEstimator) -> u32 {
        estimator.tokens_for_words(self.words_for_turn(turn_index)) + TOKEN_HEADROOM
    }
}

impl Default for ResponseBudget {
    fn default() -> Self {
        Self::from_limits(&MemoryLimits::default())
    }
}
