//! Session-wide set of phrases already mentioned.
//!
//! Inserts are commutative, so concurrent analyses can add in any order and
//! end in the same state. Each measurement reports how much of one turn was
//! new.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::text::trigrams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoveltyMeasurement {
    pub phase_id: String,
    pub turn_index: u32,
    pub new_phrases: usize,
    pub total_phrases: usize,
}

impl NoveltyMeasurement {
    /// Share of the turn's phrases not seen before.
    pub fn ratio(&self) -> f64 {
        if self.total_phrases == 0 {
            0.0
        } else {
            self.new_phrases as f64 / self.total_phrases as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct NoveltySet {
    seen: Mutex<HashSet<String>>,
    latest: Mutex<Option<NoveltyMeasurement>>,
}

impl NoveltySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every phrase of `text`; returns how many were new.
    pub fn observe(&self, phase_id: &str, turn_index: u32, text: &str) -> NoveltyMeasurement {
        let phrases = trigrams(text);
        let total_phrases = phrases.len();
        let new_phrases = {
            let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
            phrases.into_iter().filter(|p| seen.insert(p.clone())).count()
        };
        let measurement = NoveltyMeasurement {
            phase_id: phase_id.to_string(),
            turn_index,
            new_phrases,
            total_phrases,
        };
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let newer = latest
            .as_ref()
            .map_or(true, |m| m.phase_id != phase_id || m.turn_index <= turn_index);
        if newer {
            *latest = Some(measurement.clone());
        }
        measurement
    }

    pub fn contains(&self, phrase: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&phrase.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent measurement of the given phase, if any.
    pub fn latest(&self, phase_id: &str) -> Option<NoveltyMeasurement> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|m| m.phase_id == phase_id)
    }
}
