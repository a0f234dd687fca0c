//! Per-agent running summary: objective facts and subjective notes.
//!
//! Accumulation is unbounded; rendering is not. Only the last facts and a
//! single subjective note ever reach a context bundle.

use serde::{Deserialize, Serialize};

use crate::config::MemoryLimits;
use crate::text::truncate_chars;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectiveNotes {
    pub key_concerns: Vec<String>,
    pub priorities: Vec<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub objective_facts: Vec<String>,
    pub subjective: SubjectiveNotes,
}

/// Incremental update returned by the summary-update call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SummaryUpdate {
    pub new_facts: Vec<String>,
    pub new_notes: Vec<String>,
    pub key_concerns: Vec<String>,
    pub priorities: Vec<String>,
}

impl SummaryUpdate {
    pub fn is_empty(&self) -> bool {
        self.new_facts.is_empty()
            && self.new_notes.is_empty()
            && self.key_concerns.is_empty()
            && self.priorities.is_empty()
    }
}

impl AgentSummary {
    pub fn apply(&mut self, update: SummaryUpdate) {
        extend_trimmed(&mut self.objective_facts, update.new_facts);
        extend_trimmed(&mut self.subjective.notes, update.new_notes);
        extend_trimmed(&mut self.subjective.key_concerns, update.key_concerns);
        extend_trimmed(&mut self.subjective.priorities, update.priorities);
    }

    /// The one subjective note worth rendering: latest key concern, else
    /// latest priority, else latest free note.
    pub fn headline_note(&self) -> Option<&str> {
        self.subjective
            .key_concerns
            .last()
            .or_else(|| self.subjective.priorities.last())
            .or_else(|| self.subjective.notes.last())
            .map(String::as_str)
    }

    /// At most two bullets: recent facts, then the headline note.
    pub fn render(&self, limits: &MemoryLimits) -> Option<String> {
        let mut bullets = Vec::new();
        let start = self.objective_facts.len().saturating_sub(limits.summary_facts);
        let facts: Vec<String> = self.objective_facts[start..]
            .iter()
            .map(|f| truncate_chars(f, limits.fact_chars))
            .collect();
        if !facts.is_empty() {
            bullets.push(format!("- Facts: {}", facts.join("; ")));
        }
        if let Some(note) = self.headline_note() {
            bullets.push(format!("- Note: {}", truncate_chars(note, limits.note_chars)));
        }
        (!bullets.is_empty()).then(|| bullets.join("\n"))
    }
}

fn extend_trimmed(list: &mut Vec<String>, items: Vec<String>) {
    list.extend(
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    );
}
