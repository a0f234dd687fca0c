//! When should the mediator take the next turn?
//!
//! Everything here is a pure function of recent phase history. Rules are
//! checked in priority order and the first hit wins:
//!
//! ```text
//! integration phase ─────────────► never
//! turn < min_turns ──────────────► never
//! repetition flagged ────────────► Repetition
//! stagnation score > threshold ──► Stagnation
//! no belief movement (turn ≥ 4) ─► NoBeliefMovement
//! turn % 4 == 3 ─────────────────► Cadence
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::belief::BeliefState;
use crate::config::{MediatorConfig, TriggerConfig};
use crate::phase::PhaseType;
use crate::text::{alpha_tokens, trigram_list, truncate_chars};
use crate::transcript::Exchange;

/// Why the mediator was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    Repetition,
    Stagnation,
    NoBeliefMovement,
    Cadence,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repetition => write!(f, "repetition"),
            Self::Stagnation => write!(f, "stagnation"),
            Self::NoBeliefMovement => write!(f, "no_belief_movement"),
            Self::Cadence => write!(f, "cadence"),
        }
    }
}

/// One past turn as the trigger evaluator sees it.
#[derive(Debug, Clone, Copy)]
pub struct ObservedTurn<'a> {
    pub exchange: &'a Exchange,
    /// Structured belief deltas recorded across all agents after this turn.
    pub belief_deltas: usize,
}

impl<'a> ObservedTurn<'a> {
    pub fn new(exchange: &'a Exchange, belief_deltas: usize) -> Self {
        Self {
            exchange,
            belief_deltas,
        }
    }

    /// Whether this turn moved anybody's beliefs, structurally or by its
    /// own wording.
    pub fn moved_beliefs(&self, config: &TriggerConfig) -> bool {
        self.belief_deltas > 0 || textual_delta_count(&self.exchange.text, config) > 0
    }
}

/// 1 when the text announces a belief change, 0 otherwise. "No change
/// because" language always counts as no change.
pub fn textual_delta_count(text: &str, config: &TriggerConfig) -> usize {
    let lower = text.to_lowercase();
    if config.no_change_phrases.iter().any(|p| lower.contains(p.as_str())) {
        return 0;
    }
    usize::from(
        config
            .delta_indicators
            .iter()
            .any(|i| lower.contains(i.as_str())),
    )
}

fn window<'s, 'a>(turns: &'s [ObservedTurn<'a>], size: usize) -> &'s [ObservedTurn<'a>] {
    &turns[turns.len().saturating_sub(size)..]
}

/// Turns among the last `stagnation_window` that moved beliefs.
pub fn recent_delta_count(turns: &[ObservedTurn<'_>], config: &TriggerConfig) -> usize {
    window(turns, config.stagnation_window)
        .iter()
        .filter(|t| t.moved_beliefs(config))
        .count()
}

/// Bounded [0, 1] estimate of how stuck the recent discussion is.
pub fn stagnation_score(turns: &[ObservedTurn<'_>], config: &TriggerConfig) -> f64 {
    if turns.len() < 3 {
        return 0.0;
    }
    let recent = window(turns, config.stagnation_window);
    let mut score = 0.0;

    let no_change = recent
        .iter()
        .filter(|t| {
            let lower = t.exchange.text.to_lowercase();
            config.no_change_phrases.iter().any(|p| lower.contains(p.as_str()))
        })
        .count();
    score += (no_change as f64 / 3.0).min(0.4);

    let mut phrase_counts: HashMap<String, usize> = HashMap::new();
    for turn in recent {
        for phrase in trigram_list(&turn.exchange.text) {
            *phrase_counts.entry(phrase).or_default() += 1;
        }
    }
    if phrase_counts.values().any(|&n| n >= 3) {
        score += 0.3;
    }

    if recent_delta_count(recent, config) == 0 {
        score += 0.3;
    }
    f64::min(score, 1.0)
}

/// First matching rule for `turn_index`, or `None` to let personas continue.
pub fn evaluate(
    turn_index: u32,
    turns: &[ObservedTurn<'_>],
    repetition_detected: bool,
    phase_type: PhaseType,
    config: &TriggerConfig,
) -> Option<TriggerReason> {
    if phase_type == PhaseType::Integration || turn_index < config.min_turns {
        return None;
    }
    if repetition_detected {
        return Some(TriggerReason::Repetition);
    }
    if stagnation_score(turns, config) > config.stagnation_threshold {
        return Some(TriggerReason::Stagnation);
    }
    if turn_index >= config.zero_delta_min_turn && recent_delta_count(turns, config) == 0 {
        return Some(TriggerReason::NoBeliefMovement);
    }
    if config.cadence_period > 0 && turn_index % config.cadence_period == config.cadence_offset {
        return Some(TriggerReason::Cadence);
    }
    None
}

pub fn should_invoke_mediator(
    turn_index: u32,
    turns: &[ObservedTurn<'_>],
    repetition_detected: bool,
    phase_type: PhaseType,
    config: &TriggerConfig,
) -> bool {
    evaluate(turn_index, turns, repetition_detected, phase_type, config).is_some()
}

// ── Mediator DETECT signals ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementKind {
    Condition,
    Exception,
}

/// Two agents converged on the same rule or exception without saying so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementSignal {
    pub first: String,
    pub second: String,
    pub kind: AgreementKind,
    pub item: String,
}

impl AgreementSignal {
    pub fn describe(&self) -> String {
        let what = match self.kind {
            AgreementKind::Condition => "condition",
            AgreementKind::Exception => "exception",
        };
        format!(
            "{} and {} both added {what}: '{}'",
            self.first,
            self.second,
            truncate_chars(&self.item, 50)
        )
    }
}

/// Near-duplicate rules, then exceptions, held by two different agents.
/// Near-duplicate means case-insensitive substring containment either way.
pub fn detect_implicit_agreement(states: &[(&str, &BeliefState)]) -> Option<AgreementSignal> {
    if states.len() < 2 {
        return None;
    }
    let rules = states.iter().flat_map(|(name, s)| {
        s.conditional_rules
            .iter()
            .map(move |r| (*name, r.to_lowercase()))
    });
    if let Some((first, second, item)) = overlapping(rules.collect()) {
        return Some(AgreementSignal {
            first,
            second,
            kind: AgreementKind::Condition,
            item,
        });
    }
    let exceptions = states
        .iter()
        .flat_map(|(name, s)| s.exceptions.iter().map(move |e| (*name, e.to_lowercase())));
    overlapping(exceptions.collect()).map(|(first, second, item)| AgreementSignal {
        first,
        second,
        kind: AgreementKind::Exception,
        item,
    })
}

fn overlapping(items: Vec<(&str, String)>) -> Option<(String, String, String)> {
    for (i, (a, x)) in items.iter().enumerate() {
        for (b, y) in &items[i + 1..] {
            if a != b && (x.contains(y.as_str()) || y.contains(x.as_str())) {
                return Some((a.to_string(), b.to_string(), x.clone()));
            }
        }
    }
    None
}

/// Abstract terms used in at least `abstraction_repeats` of the last
/// `abstraction_window` exchanges, in configured order.
pub fn abstraction_overload(exchanges: &[Exchange], config: &MediatorConfig) -> Vec<String> {
    let recent = &exchanges[exchanges.len().saturating_sub(config.abstraction_window)..];
    let tokenized: Vec<Vec<String>> = recent.iter().map(|e| alpha_tokens(&e.text)).collect();
    config
        .abstraction_terms
        .iter()
        .filter(|term| {
            let uses = tokenized
                .iter()
                .filter(|tokens| tokens.iter().any(|t| t == *term))
                .count();
            uses >= config.abstraction_repeats
        })
        .cloned()
        .collect()
}

/// The overused term the mediator should ask to have defined, skipping
/// terms it already forced.
pub fn term_to_define(
    turn_index: u32,
    exchanges: &[Exchange],
    already_forced: &[String],
    config: &MediatorConfig,
) -> Option<String> {
    if turn_index < config.definition_min_turn {
        return None;
    }
    abstraction_overload(exchanges, config)
        .into_iter()
        .find(|term| !already_forced.contains(term))
}
