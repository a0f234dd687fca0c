//! Structured epistemic position of one agent.

use serde::{Deserialize, Serialize};

use crate::config::MemoryLimits;
use crate::text::truncate_chars;

/// Coarse certainty band derived from confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Certainty {
    Low,
    #[default]
    Medium,
    High,
}

impl Certainty {
    /// high > 0.7, medium > 0.4, else low.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.7 {
            Self::High
        } else if confidence > 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for Certainty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concession {
    pub from: String,
    pub point: String,
    pub turn: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefDelta {
    pub turn: u32,
    pub change: String,
    pub reason: String,
}

/// One agent's belief state. Owned and mutated only by that agent's
/// update step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefState {
    pub position: Option<String>,
    pub certainty: Certainty,
    pub confidence: f64,
    pub conditional_rules: Vec<String>,
    pub exceptions: Vec<String>,
    pub accepted_critiques: Vec<String>,
    pub uncertainties: Vec<String>,
    pub concessions: Vec<Concession>,
    pub deltas: Vec<BeliefDelta>,
}

impl Default for BeliefState {
    fn default() -> Self {
        Self {
            position: None,
            certainty: Certainty::Medium,
            confidence: 0.5,
            conditional_rules: Vec::new(),
            exceptions: Vec::new(),
            accepted_critiques: Vec::new(),
            uncertainties: Vec::new(),
            concessions: Vec::new(),
            deltas: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConcessionUpdate {
    #[serde(default)]
    pub from_speaker: String,
    #[serde(default)]
    pub point: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeltaUpdate {
    #[serde(default)]
    pub change: String,
    #[serde(default)]
    pub reason: String,
}

/// Incremental update returned by the belief-update call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BeliefUpdate {
    pub position: Option<String>,
    pub confidence: Option<f64>,
    pub new_conditional_rules: Vec<String>,
    pub new_exceptions: Vec<String>,
    pub new_accepted_critiques: Vec<String>,
    pub new_uncertainties: Vec<String>,
    /// Indices into the current uncertainty list.
    pub resolved_uncertainties: Vec<usize>,
    pub new_concessions: Vec<ConcessionUpdate>,
    pub new_deltas: Vec<DeltaUpdate>,
}

impl BeliefState {
    /// Apply one incremental update observed at `turn`. Returns the number
    /// of belief deltas recorded.
    pub fn apply(&mut self, update: BeliefUpdate, turn: u32) -> usize {
        if let Some(position) = update.position.filter(|p| !p.trim().is_empty()) {
            self.position = Some(position);
        }
        if let Some(confidence) = update.confidence.filter(|c| c.is_finite()) {
            self.confidence = confidence.clamp(0.0, 1.0);
            self.certainty = Certainty::from_confidence(self.confidence);
        }

        push_new(&mut self.conditional_rules, update.new_conditional_rules);
        push_new(&mut self.exceptions, update.new_exceptions);
        push_new(&mut self.accepted_critiques, update.new_accepted_critiques);

        let mut resolved = update.resolved_uncertainties;
        resolved.sort_unstable();
        resolved.dedup();
        for idx in resolved.into_iter().rev() {
            if idx < self.uncertainties.len() {
                self.uncertainties.remove(idx);
            }
        }
        push_new(&mut self.uncertainties, update.new_uncertainties);

        for c in update.new_concessions {
            if c.point.trim().is_empty() {
                continue;
            }
            self.concessions.push(Concession {
                from: c.from_speaker,
                point: c.point,
                turn,
            });
        }

        let mut recorded = 0;
        for d in update.new_deltas {
            if d.change.trim().is_empty() {
                continue;
            }
            self.deltas.push(BeliefDelta {
                turn,
                change: d.change,
                reason: d.reason,
            });
            recorded += 1;
        }
        recorded
    }

    /// Compact rendering for a context bundle; every list shows only its
    /// most recent entries.
    pub fn render(&self, limits: &MemoryLimits) -> String {
        let mut lines = Vec::new();
        let position = self
            .position
            .as_deref()
            .map(|p| truncate_chars(p, limits.position_chars))
            .unwrap_or_else(|| "not yet stated".into());
        lines.push(format!("Position: {position}"));
        lines.push(format!(
            "Certainty: {} (confidence {:.2})",
            self.certainty, self.confidence
        ));

        let item = |s: &String| truncate_chars(s, limits.belief_item_chars);
        render_list(&mut lines, "Rules", &self.conditional_rules, limits.belief_list_items, item);
        render_list(&mut lines, "Exceptions", &self.exceptions, limits.belief_list_items, item);
        render_list(
            &mut lines,
            "Accepted critiques",
            &self.accepted_critiques,
            limits.belief_list_items,
            item,
        );
        render_list(
            &mut lines,
            "Open uncertainties",
            &self.uncertainties,
            limits.belief_list_items,
            item,
        );
        render_list(
            &mut lines,
            "Concessions",
            &self.concessions,
            limits.belief_history_items,
            |c| {
                format!(
                    "to {}: {}",
                    c.from,
                    truncate_chars(&c.point, limits.belief_item_chars)
                )
            },
        );
        render_list(
            &mut lines,
            "Recent shifts",
            &self.deltas,
            limits.belief_history_items,
            |d| {
                format!(
                    "turn {}: {}",
                    d.turn,
                    truncate_chars(&d.change, limits.belief_item_chars)
                )
            },
        );
        lines.join("\n")
    }
}

fn push_new(list: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !list.contains(&item) {
            list.push(item);
        }
    }
}

fn render_list<T>(
    lines: &mut Vec<String>,
    label: &str,
    items: &[T],
    keep: usize,
    fmt: impl Fn(&T) -> String,
) {
    if items.is_empty() || keep == 0 {
        return;
    }
    lines.push(format!("{label}:"));
    let start = items.len().saturating_sub(keep);
    for item in &items[start..] {
        lines.push(format!("- {}", fmt(item)));
    }
}
