//! Per-speaker repetition check.
//!
//! A speaker repeats themselves when at least `repetition_overlap` of the
//! 3-word phrases in their current turn already appeared in one of their own
//! last `repetition_history` turns.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::TriggerConfig;
use crate::text::trigrams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepetitionHit {
    pub speaker: String,
    pub overlap: f64,
}

#[derive(Debug, Clone)]
pub struct RepetitionDetector {
    history: HashMap<String, VecDeque<HashSet<String>>>,
    compare: usize,
    keep: usize,
    threshold: f64,
}

impl Default for RepetitionDetector {
    fn default() -> Self {
        Self::new(&TriggerConfig::default())
    }
}

impl RepetitionDetector {
    pub fn new(config: &TriggerConfig) -> Self {
        Self {
            history: HashMap::new(),
            compare: config.repetition_history,
            keep: config.speaker_history.max(config.repetition_history),
            threshold: config.repetition_overlap,
        }
    }

    /// Compare `text` against the speaker's recent turns, then remember it.
    pub fn check_and_record(&mut self, speaker: &str, text: &str) -> Option<RepetitionHit> {
        let current = trigrams(text);
        let past = self.history.entry(speaker.to_string()).or_default();

        let overlap = if current.is_empty() {
            0.0
        } else {
            past.iter()
                .rev()
                .take(self.compare)
                .map(|prior| current.intersection(prior).count() as f64 / current.len() as f64)
                .fold(0.0, f64::max)
        };

        past.push_back(current);
        while past.len() > self.keep {
            past.pop_front();
        }

        (overlap >= self.threshold).then(|| RepetitionHit {
            speaker: speaker.to_string(),
            overlap,
        })
    }

    /// Forget every speaker's history.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn remembered(&self, speaker: &str) -> usize {
        self.history.get(speaker).map_or(0, VecDeque::len)
    }
}
