//! Facilitator: participant selection, turn decisions and phase summaries.
//!
//! Two implementations sit behind [`TurnDecider`]:
//!
//! - [`LlmFacilitator`] asks the facilitator model for structured JSON
//! - [`HeuristicFacilitator`] applies [`TurnPolicy`] directly, no model calls
//!
//! Every failure surfaces as `DecisionError` (selection, decision) or
//! `GenerationError` (summary); the phase runner owns the fallbacks
//! ([`rank_by_relevance`], round-robin, [`fallback_summary`]).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::turn_policy::TurnPolicy;
use crate::completion::{
    complete_with_timeout, parse_json_block, ChatMessage, CompletionRequest, RequestPurpose,
    SharedCompletionClient,
};
use crate::errors::{DeliberationError, Result};
use crate::persona::PersonaProfile;
use crate::phase::Phase;
use crate::text::{alpha_tokens, truncate_chars};
use crate::transcript::Exchange;

const DECISION_HISTORY: usize = 5;
const DECISION_EXCHANGE_CHARS: usize = 200;
const SUMMARY_EXCHANGE_CHARS: usize = 300;

/// Who produced a speaking decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Facilitator,
    Heuristic,
    RoundRobin,
    Mediator,
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Facilitator => write!(f, "facilitator"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::RoundRobin => write!(f, "round_robin"),
            Self::Mediator => write!(f, "mediator"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnDecision {
    Speak { speaker: String, reasoning: String },
    PhaseComplete { reasoning: String },
}

/// Inputs for one turn decision.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub phase: &'a Phase,
    pub turn_index: u32,
    pub pool: &'a [Arc<PersonaProfile>],
    /// Phase exchanges so far.
    pub history: &'a [Exchange],
}

#[async_trait]
pub trait TurnDecider: Send + Sync {
    /// Pick the active subset for a phase. `max` bounds the result.
    async fn select_participants(
        &self,
        phase: &Phase,
        pool: &[Arc<PersonaProfile>],
        max: usize,
    ) -> Result<Vec<Arc<PersonaProfile>>>;

    /// Who speaks next, or whether the phase is done.
    async fn decide(&self, input: DecisionInput<'_>) -> Result<TurnDecision>;

    /// 2-3 sentence summary over every exchange of the phase.
    async fn summarize_phase(&self, phase: &Phase, exchanges: &[Exchange]) -> Result<String>;

    fn source(&self) -> DecisionSource;
}

pub type SharedTurnDecider = Arc<dyn TurnDecider>;

/// Pool ranked by keyword overlap between each profile and the phase goal
/// and desired outcome, best first, pool order on ties.
pub fn rank_by_relevance(
    phase: &Phase,
    pool: &[Arc<PersonaProfile>],
    max: usize,
) -> Vec<Arc<PersonaProfile>> {
    let keywords: HashSet<String> = alpha_tokens(&format!("{} {}", phase.goal, phase.desired_outcome))
        .into_iter()
        .filter(|w| w.chars().count() > 3)
        .collect();
    let mut scored: Vec<(usize, usize, &Arc<PersonaProfile>)> = pool
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            let profile: HashSet<String> = alpha_tokens(&p.searchable_text()).into_iter().collect();
            (profile.intersection(&keywords).count(), idx, p)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(max).map(|(_, _, p)| p.clone()).collect()
}

pub fn fallback_summary(phase: &Phase, exchanges: usize) -> String {
    format!("Phase '{}' completed with {} exchanges.", phase.id, exchanges)
}

// ── LLM facilitator ──

#[derive(Debug, Deserialize)]
struct SelectionPayload {
    #[serde(default, alias = "selected_personas")]
    selected: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct DecisionPayload {
    #[serde(default)]
    phase_complete: bool,
    #[serde(default)]
    next_speaker: Option<String>,
    #[serde(default)]
    addressed: Option<String>,
    #[serde(default)]
    reasoning: String,
}

/// Facilitator backed by a completion model.
#[derive(Clone)]
pub struct LlmFacilitator {
    client: SharedCompletionClient,
    model: String,
    timeout: Duration,
    min_participants: usize,
}

impl LlmFacilitator {
    pub fn new(client: SharedCompletionClient, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
            min_participants: 3,
        }
    }

    pub fn with_min_participants(mut self, min: usize) -> Self {
        self.min_participants = min;
        self
    }

    async fn ask(&self, purpose: RequestPurpose, system: &str, user: String, json: bool) -> Result<String> {
        let mut request = CompletionRequest::new(
            &self.model,
            purpose,
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        );
        if json {
            request = request.json();
        }
        complete_with_timeout(self.client.as_ref(), request, self.timeout).await
    }
}

fn roster(pool: &[Arc<PersonaProfile>]) -> String {
    pool.iter()
        .map(|p| {
            if p.purpose.is_empty() {
                format!("- {}: {}", p.name, p.role_description)
            } else {
                format!("- {}: {} (purpose: {})", p.name, p.role_description, p.purpose)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl TurnDecider for LlmFacilitator {
    async fn select_participants(
        &self,
        phase: &Phase,
        pool: &[Arc<PersonaProfile>],
        max: usize,
    ) -> Result<Vec<Arc<PersonaProfile>>> {
        let user = format!(
            "PHASE: {}\nGoal: {}\nDesired outcome: {}\n\nAVAILABLE PERSONAS:\n{}\n\n\
             Select the {}-{} most relevant personas by purpose, strengths and diversity of \
             perspective. Respond with JSON {{\"selected\": [exact names], \"reasoning\": \"...\"}}.",
            phase.id,
            phase.goal,
            phase.desired_outcome,
            roster(pool),
            self.min_participants.min(max),
            max
        );
        let raw = self
            .ask(
                RequestPurpose::ParticipantSelection,
                "You are an expert meeting facilitator selecting participants for a phase.",
                user,
                true,
            )
            .await
            .map_err(DeliberationError::into_decision)?;
        let payload: SelectionPayload = parse_json_block(&raw)
            .map_err(|e| DeliberationError::decision(format!("selection payload: {e}")))?;

        let mut chosen: Vec<Arc<PersonaProfile>> = Vec::new();
        for name in &payload.selected {
            if let Some(p) = pool.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim())) {
                if !chosen.iter().any(|c| c.name == p.name) {
                    chosen.push(p.clone());
                }
            }
        }
        if chosen.is_empty() {
            return Err(DeliberationError::decision("selection named no known persona"));
        }
        // Pad up to the minimum with the most relevant remaining personas.
        let floor = self.min_participants.min(max).min(pool.len());
        if chosen.len() < floor {
            for p in rank_by_relevance(phase, pool, pool.len()) {
                if chosen.len() >= floor {
                    break;
                }
                if !chosen.iter().any(|c| c.name == p.name) {
                    chosen.push(p);
                }
            }
        }
        chosen.truncate(max);
        debug!(phase = %phase.id, selected = chosen.len(), reasoning = %payload.reasoning, "participants selected");
        Ok(chosen)
    }

    async fn decide(&self, input: DecisionInput<'_>) -> Result<TurnDecision> {
        let recent = &input.history[input.history.len().saturating_sub(DECISION_HISTORY)..];
        let recent_text = if recent.is_empty() {
            "No exchanges yet".to_string()
        } else {
            recent
                .iter()
                .map(|e| format!("{}: {}", e.speaker_id, truncate_chars(&e.text, DECISION_EXCHANGE_CHARS)))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let names: Vec<&str> = input.pool.iter().map(|p| p.name.as_str()).collect();
        let user = format!(
            "PHASE: {}\nGoal: {}\nDesired outcome: {}\nTurns so far: {}/{}\n\n\
             ACTIVE PERSONAS:\n{}\n\nRECENT EXCHANGES:\n{}\n\n\
             Choose who speaks next for natural flow: whoever was addressed answers; whoever was \
             challenged may defend, for at most 2-3 exchanges; otherwise balance participation.\n\
             Mark phase_complete true ONLY if the desired outcome is clearly achieved.\n\
             Respond with JSON {{\"phase_complete\": bool, \"next_speaker\": name or null, \
             \"addressed\": name or null, \"reasoning\": \"...\"}}. Choose from: {}",
            input.phase.id,
            input.phase.goal,
            input.phase.desired_outcome,
            input.turn_index,
            input.phase.max_turns,
            roster(input.pool),
            recent_text,
            names.join(", ")
        );
        let raw = self
            .ask(
                RequestPurpose::TurnDecision,
                "You are an expert meeting facilitator managing conversation flow.",
                user,
                true,
            )
            .await
            .map_err(DeliberationError::into_decision)?;
        let payload: DecisionPayload = parse_json_block(&raw)
            .map_err(|e| DeliberationError::decision(format!("decision payload: {e}")))?;

        if payload.phase_complete {
            return Ok(TurnDecision::PhaseComplete {
                reasoning: payload.reasoning,
            });
        }
        let speaker = payload
            .next_speaker
            .or(payload.addressed)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| DeliberationError::decision("decision named no speaker"))?;
        Ok(TurnDecision::Speak {
            speaker,
            reasoning: payload.reasoning,
        })
    }

    async fn summarize_phase(&self, phase: &Phase, exchanges: &[Exchange]) -> Result<String> {
        let conversation = exchanges
            .iter()
            .map(|e| format!("{}: {}", e.speaker_id, truncate_chars(&e.text, SUMMARY_EXCHANGE_CHARS)))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "PHASE: {}\nGoal: {}\n\nCONVERSATION:\n{}\n\n\
             Write a concise summary (2-3 sentences) of what was accomplished and the key decisions.",
            phase.id, phase.goal, conversation
        );
        self.ask(
            RequestPurpose::PhaseSummary,
            "You are a meeting facilitator creating phase summaries.",
            user,
            false,
        )
        .await
    }

    fn source(&self) -> DecisionSource {
        DecisionSource::Facilitator
    }
}

// ── Heuristic facilitator ──

/// Deterministic, model-free decider. Never ends a phase early; the turn
/// cap does.
#[derive(Debug, Clone, Default)]
pub struct HeuristicFacilitator {
    policy: TurnPolicy,
}

impl HeuristicFacilitator {
    pub fn new(policy: TurnPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl TurnDecider for HeuristicFacilitator {
    async fn select_participants(
        &self,
        phase: &Phase,
        pool: &[Arc<PersonaProfile>],
        max: usize,
    ) -> Result<Vec<Arc<PersonaProfile>>> {
        Ok(rank_by_relevance(phase, pool, max))
    }

    async fn decide(&self, input: DecisionInput<'_>) -> Result<TurnDecision> {
        let speaker = self
            .policy
            .choose(input.pool, input.history)
            .ok_or_else(|| DeliberationError::decision("empty participant pool"))?;
        Ok(TurnDecision::Speak {
            speaker,
            reasoning: "turn policy".into(),
        })
    }

    async fn summarize_phase(&self, phase: &Phase, exchanges: &[Exchange]) -> Result<String> {
        Ok(fallback_summary(phase, exchanges.len()))
    }

    fn source(&self) -> DecisionSource {
        DecisionSource::Heuristic
    }
}
