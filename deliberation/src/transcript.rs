//! Append-only exchange log.
//!
//! Exchanges live in one arena ordered by global sequence. Each phase owns a
//! contiguous span of it, and `(phase_id, turn_index)` resolves to a slot in
//! O(1). Readers only ever take bounded suffix slices of a phase.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{DeliberationError, Result};

/// Kind of participant that produced an exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerKind {
    #[default]
    Persona,
    Mediator,
}

/// One turn of the discussion. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub phase_id: String,
    pub turn_index: u32,
    pub speaker_id: String,
    pub text: String,
    #[serde(default)]
    pub speaker_kind: SpeakerKind,
}

impl Exchange {
    pub fn new(
        phase_id: impl Into<String>,
        turn_index: u32,
        speaker_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            phase_id: phase_id.into(),
            turn_index,
            speaker_id: speaker_id.into(),
            text: text.into(),
            speaker_kind: SpeakerKind::Persona,
        }
    }

    pub fn from_mediator(mut self) -> Self {
        self.speaker_kind = SpeakerKind::Mediator;
        self
    }

    pub fn is_mediator(&self) -> bool {
        self.speaker_kind == SpeakerKind::Mediator
    }
}

#[derive(Debug, Clone)]
struct PhaseSpan {
    phase_id: String,
    start: usize,
    end: usize,
}

/// The canonical turn log.
#[derive(Debug, Default)]
pub struct Transcript {
    exchanges: Vec<Exchange>,
    spans: Vec<PhaseSpan>,
    index: HashMap<(String, u32), usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an exchange, returning its global sequence number.
    ///
    /// Turn indices must increase within a phase, and a phase cannot be
    /// reopened once another phase has started.
    pub fn append(&mut self, exchange: Exchange) -> Result<usize> {
        let seq = self.exchanges.len();
        match self.spans.last_mut() {
            Some(span) if span.phase_id == exchange.phase_id => {
                let last_turn = self.exchanges[span.end - 1].turn_index;
                if exchange.turn_index <= last_turn {
                    return Err(DeliberationError::configuration(format!(
                        "turn {} of phase '{}' is not after turn {}",
                        exchange.turn_index, exchange.phase_id, last_turn
                    )));
                }
                span.end = seq + 1;
            }
            _ => {
                if self.spans.iter().any(|s| s.phase_id == exchange.phase_id) {
                    return Err(DeliberationError::configuration(format!(
                        "phase '{}' is closed",
                        exchange.phase_id
                    )));
                }
                self.spans.push(PhaseSpan {
                    phase_id: exchange.phase_id.clone(),
                    start: seq,
                    end: seq + 1,
                });
            }
        }
        self.index
            .insert((exchange.phase_id.clone(), exchange.turn_index), seq);
        self.exchanges.push(exchange);
        Ok(seq)
    }

    pub fn get(&self, phase_id: &str, turn_index: u32) -> Option<&Exchange> {
        self.index
            .get(&(phase_id.to_string(), turn_index))
            .map(|&seq| &self.exchanges[seq])
    }

    /// All exchanges of one phase, in turn order.
    pub fn phase(&self, phase_id: &str) -> &[Exchange] {
        self.spans
            .iter()
            .find(|s| s.phase_id == phase_id)
            .map(|s| &self.exchanges[s.start..s.end])
            .unwrap_or(&[])
    }

    /// The last `n` exchanges of one phase.
    pub fn recent(&self, phase_id: &str, n: usize) -> &[Exchange] {
        let all = self.phase(phase_id);
        &all[all.len().saturating_sub(n)..]
    }

    pub fn all(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}
