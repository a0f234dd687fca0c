//! Coverage check producing at most one advisory nudge per turn.
//!
//! Checked in order, first hit wins:
//! 1. a participant silent across the recent window
//! 2. apparent stagnation (short, agreeable turns, or no new phrases)
//! 3. an expected topic for this phase not yet mentioned

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::novelty::NoveltyMeasurement;
use crate::config::GapConfig;
use crate::persona::PersonaProfile;
use crate::phase::Phase;
use crate::transcript::Exchange;

/// Turns inspected by the stagnation check.
const STAGNATION_LOOKBACK: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GapNudge {
    SilentParticipant { name: String, role: String },
    Stagnation,
    MissingTopic { topic: String },
}

impl GapNudge {
    pub fn message(&self) -> String {
        match self {
            Self::SilentParticipant { name, role } => format!(
                "{name} ({role}) hasn't weighed in recently. Their perspective might add value."
            ),
            Self::Stagnation => {
                "The discussion might benefit from a new angle or specific example to move forward."
                    .to_string()
            }
            Self::MissingTopic { topic } => {
                format!("The discussion hasn't touched on {topic} yet.")
            }
        }
    }

    /// Advisory wording injected into the next speaker's context.
    pub fn render(&self) -> String {
        format!("[Optional consideration: {}]", self.message())
    }
}

#[derive(Debug, Clone, Default)]
pub struct GapDetector {
    config: GapConfig,
}

impl GapDetector {
    pub fn new(config: GapConfig) -> Self {
        Self { config }
    }

    /// `exchanges` are the current phase's exchanges in order.
    pub fn detect(
        &self,
        phase: &Phase,
        exchanges: &[Exchange],
        participants: &[Arc<PersonaProfile>],
        novelty: Option<&NoveltyMeasurement>,
    ) -> Option<GapNudge> {
        let persona_turns: Vec<&Exchange> = exchanges.iter().filter(|e| !e.is_mediator()).collect();
        self.silent_participant(&persona_turns, participants)
            .or_else(|| self.stagnation(&persona_turns, novelty))
            .or_else(|| self.missing_topic(phase, &persona_turns))
    }

    fn silent_participant(
        &self,
        turns: &[&Exchange],
        participants: &[Arc<PersonaProfile>],
    ) -> Option<GapNudge> {
        if turns.len() < self.config.min_exchanges_for_participation {
            return None;
        }
        let window = &turns[turns.len().saturating_sub(self.config.silent_window)..];
        let recent: HashSet<&str> = window.iter().map(|e| e.speaker_id.as_str()).collect();
        participants
            .iter()
            .find(|p| !recent.contains(p.name.as_str()))
            .map(|p| GapNudge::SilentParticipant {
                name: p.name.clone(),
                role: p.role_description.clone(),
            })
    }

    fn stagnation(
        &self,
        turns: &[&Exchange],
        novelty: Option<&NoveltyMeasurement>,
    ) -> Option<GapNudge> {
        if turns.len() < STAGNATION_LOOKBACK {
            return None;
        }
        let recent = &turns[turns.len() - STAGNATION_LOOKBACK..];
        let all_short = recent
            .iter()
            .all(|e| e.text.chars().count() < self.config.short_turn_chars);
        let agreeing = recent
            .iter()
            .filter(|e| {
                let lower = e.text.to_lowercase();
                self.config
                    .agreement_phrases
                    .iter()
                    .any(|p| lower.contains(p.as_str()))
            })
            .count();
        let high_agreement = agreeing + 1 >= STAGNATION_LOOKBACK;
        let speakers: HashSet<&str> = recent.iter().map(|e| e.speaker_id.as_str()).collect();
        let low_diversity = speakers.len() <= 2;
        let nothing_new = novelty.is_some_and(|m| m.total_phrases > 0 && m.new_phrases == 0);

        ((all_short && high_agreement) || (high_agreement && low_diversity) || nothing_new)
            .then_some(GapNudge::Stagnation)
    }

    fn missing_topic(&self, phase: &Phase, turns: &[&Exchange]) -> Option<GapNudge> {
        if turns.len() < self.config.min_exchanges_for_topics {
            return None;
        }
        let phase_id = phase.id.to_lowercase();
        let discussion = turns
            .iter()
            .map(|e| e.text.to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");
        self.config
            .topics
            .iter()
            .filter(|t| t.phase_keywords.iter().any(|k| phase_id.contains(k.as_str())))
            .find(|t| !t.markers.iter().any(|m| discussion.contains(m.as_str())))
            .map(|t| GapNudge::MissingTopic {
                topic: t.topic.clone(),
            })
    }
}
