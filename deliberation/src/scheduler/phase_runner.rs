//! Phase scheduler: the single control loop that drives one phase.
//!
//! ```text
//! select participants
//!        │
//!        ▼
//! ┌─► cancelled? ──yes──► stop
//! │      │
//! │      ▼
//! │  triggers fire? ──yes──► mediator plan ──┐
//! │      │ no                                │
//! │      ▼                                   │
//! │  decide + review ──done──► stop          │
//! │      │ (error: round-robin)              │
//! │      ▼                                   ▼
//! │  compress context ───────────────► generate (timeout)
//! │                                          │ error: skip turn
//! │                                          ▼
//! │  append exchange ──► spawn analyses (persona only)
//! │      │
//! │      ▼
//! │  update every active agent (concurrent, joined)
//! └──────┘ turn_index += 1 until max_turns
//!
//! join analyses ──► summarize ──► whiteboard
//! ```
//!
//! Speaking order is strictly sequential. Only the per-agent memory
//! updates and the background analyses run concurrently, and nothing
//! about a phase escapes as an error: every failure degrades into a
//! skipped turn, a fallback decision, or an empty result.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::analysis::{AnalysisGroup, AnalysisReport};
use super::facilitator::{
    fallback_summary, rank_by_relevance, DecisionInput, DecisionSource, SharedTurnDecider,
    TurnDecision,
};
use super::turn_policy::{round_robin, TurnPolicy};
use crate::belief::{AgentMemory, BeliefState, MemoryUpdateOutcome, MemoryUpdater};
use crate::completion::SharedCompletionClient;
use crate::config::DeliberationConfig;
use crate::errors::{DeliberationError, Result};
use crate::events::{DiscussionEvent, SharedEventBus};
use crate::ideas::{GapDetector, IdeaExtractor, IdeaLedger, NoveltySet};
use crate::mediation::{
    evaluate, stagnation_score, Mediator, MediatorBrief, MediatorPlan, ObservedTurn,
    RepetitionDetector, RepetitionHit, TriggerReason,
};
use crate::memory::{CompressorInput, ContextBundle, MemoryCompressor};
use crate::persona::{Participant, PersonaProfile, TurnPrompt, MEDIATOR_ID};
use crate::phase::Phase;
use crate::transcript::{Exchange, SpeakerKind, Transcript};

/// Why a phase stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEnd {
    /// The decision step declared the phase done.
    DecisionComplete,
    TurnCap,
    Cancelled,
    /// Invalid phase or empty pool; nothing ran.
    ConfigurationError,
}

impl std::fmt::Display for PhaseEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DecisionComplete => write!(f, "decision_complete"),
            Self::TurnCap => write!(f, "turn_cap"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::ConfigurationError => write!(f, "configuration_error"),
        }
    }
}

/// One consumed turn index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_index: u32,
    pub speaker: String,
    pub speaker_kind: SpeakerKind,
    pub source: DecisionSource,
    /// Characters of rendered context sent with the generation call.
    pub context_chars: usize,
    /// Structured belief deltas across all agents after this turn.
    pub belief_deltas: usize,
    /// Set when generation failed and the turn was skipped.
    pub error: Option<String>,
}

impl TurnRecord {
    pub fn skipped(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_id: String,
    pub participants: Vec<String>,
    pub turns: Vec<TurnRecord>,
    /// Exchanges appended to the transcript by this phase.
    pub exchanges: usize,
    pub ended_by: PhaseEnd,
    pub summary: String,
    pub analysis: AnalysisReport,
    pub interventions: u32,
}

impl PhaseResult {
    fn empty(phase: &Phase, ended_by: PhaseEnd) -> Self {
        Self {
            phase_id: phase.id.clone(),
            participants: Vec::new(),
            turns: Vec::new(),
            exchanges: 0,
            ended_by,
            summary: fallback_summary(phase, 0),
            analysis: AnalysisReport::default(),
            interventions: 0,
        }
    }

    pub fn turns_taken(&self) -> u32 {
        self.turns.len() as u32
    }

    /// Turn indices the mediator spoke at.
    pub fn mediator_turns(&self) -> Vec<u32> {
        self.turns
            .iter()
            .filter(|t| t.speaker_kind == SpeakerKind::Mediator && !t.skipped())
            .map(|t| t.turn_index)
            .collect()
    }
}

/// State carried from phase to phase within one session.
pub struct DiscussionState {
    pub transcript: Transcript,
    /// Persona memories by name. The mediator never has an entry.
    pub memories: HashMap<String, AgentMemory>,
    /// Summaries of completed phases, oldest first.
    pub whiteboard: Vec<String>,
    pub mediator: Mediator,
    pub repetition: RepetitionDetector,
}

impl DiscussionState {
    pub fn new(config: &DeliberationConfig) -> Self {
        Self {
            transcript: Transcript::new(),
            memories: HashMap::new(),
            whiteboard: Vec::new(),
            mediator: Mediator::new(config.mediator.clone(), config.memory.clone()),
            repetition: RepetitionDetector::new(&config.triggers),
        }
    }

    pub fn belief(&self, agent: &str) -> Option<&BeliefState> {
        self.memories.get(agent).and_then(AgentMemory::belief_state)
    }
}

enum NextTurn {
    Speak {
        persona: Arc<PersonaProfile>,
        source: DecisionSource,
        reasoning: String,
    },
    Complete(String),
    NoneEligible,
}

pub struct PhaseScheduler {
    client: SharedCompletionClient,
    decider: SharedTurnDecider,
    config: DeliberationConfig,
    bus: SharedEventBus,
    ledger: Arc<IdeaLedger>,
    novelty: Arc<NoveltySet>,
    extractor: Arc<IdeaExtractor>,
    updater: MemoryUpdater,
    compressor: MemoryCompressor,
    gaps: GapDetector,
    policy: TurnPolicy,
    cancel: CancellationToken,
}

impl PhaseScheduler {
    /// Fails only when the configured proposal patterns do not compile.
    pub fn new(
        client: SharedCompletionClient,
        decider: SharedTurnDecider,
        config: DeliberationConfig,
        bus: SharedEventBus,
    ) -> Result<Self> {
        let analysis_timeout = config.scheduler.analysis_timeout();
        let extractor = IdeaExtractor::new(
            client.clone(),
            &config.models.analysis,
            analysis_timeout,
            &config.ideas,
        )?;
        let updater = MemoryUpdater::new(client.clone(), &config.models.analysis, analysis_timeout)
            .with_summary_updates(config.update_summaries);
        Ok(Self {
            ledger: Arc::new(IdeaLedger::new(config.ideas.similarity_threshold)),
            novelty: Arc::new(NoveltySet::new()),
            extractor: Arc::new(extractor),
            updater,
            compressor: MemoryCompressor::new(config.memory.clone()),
            gaps: GapDetector::new(config.gaps.clone()),
            policy: TurnPolicy::new(&config.scheduler),
            cancel: CancellationToken::new(),
            client,
            decider,
            config,
            bus,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn ledger(&self) -> &Arc<IdeaLedger> {
        &self.ledger
    }

    pub fn novelty(&self) -> &Arc<NoveltySet> {
        &self.novelty
    }

    pub fn config(&self) -> &DeliberationConfig {
        &self.config
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    /// Fresh session state matching this scheduler's configuration.
    pub fn new_state(&self) -> DiscussionState {
        DiscussionState::new(&self.config)
    }

    /// Run one phase to completion. Never fails: configuration problems
    /// yield an empty result, turn failures are skipped.
    pub async fn run_phase(
        &self,
        phase: &Phase,
        pool: &[Arc<PersonaProfile>],
        state: &mut DiscussionState,
    ) -> PhaseResult {
        self.bus.publish(DiscussionEvent::PhaseStarted {
            phase_id: phase.id.clone(),
            goal: phase.goal.clone(),
            phase_type: phase.phase_type,
            max_turns: phase.max_turns,
            timestamp: Utc::now(),
        });
        info!(phase = %phase.id, phase_type = %phase.phase_type, max_turns = phase.max_turns, pool = pool.len(), "phase started");

        if let Err(e) = check_runnable(phase, pool, &state.transcript) {
            warn!(phase = %phase.id, error = %e, "phase not runnable");
            let result = PhaseResult::empty(phase, PhaseEnd::ConfigurationError);
            self.publish_completed(&result);
            return result;
        }

        let active = self.select_participants(phase, pool).await;
        for persona in &active {
            state
                .memories
                .entry(persona.name.clone())
                .or_insert_with(AgentMemory::new);
        }
        // Phrases from an earlier phase do not count as repetition here.
        state.repetition.reset();

        let timeout = self.config.scheduler.generation_timeout();
        let interventions_before = state.mediator.log().interventions;
        let mut analyses = AnalysisGroup::new(
            self.extractor.clone(),
            self.ledger.clone(),
            self.novelty.clone(),
            self.bus.clone(),
        );
        let mut turns: Vec<TurnRecord> = Vec::new();
        let mut deltas_by_turn: HashMap<u32, usize> = HashMap::new();
        let mut pending_repetition: Option<RepetitionHit> = None;
        let mut ended_by = PhaseEnd::TurnCap;
        let mut turn_index: u32 = 0;

        while turn_index < phase.max_turns {
            if self.cancel.is_cancelled() {
                info!(phase = %phase.id, turn = turn_index, "phase cancelled");
                ended_by = PhaseEnd::Cancelled;
                break;
            }

            let repetition = pending_repetition.take();
            let trigger = self.mediator_trigger(phase, turn_index, state, &deltas_by_turn, repetition.is_some());

            let (participant, prompt, plan, source, context_chars) = match trigger {
                Some((reason, stagnation)) => {
                    let plan = self.plan_intervention(
                        phase,
                        turn_index,
                        &active,
                        state,
                        reason,
                        repetition.as_ref(),
                        stagnation,
                    );
                    self.publish_decision(phase, turn_index, MEDIATOR_ID, DecisionSource::Mediator, format!("trigger: {reason}"));
                    let context_chars = plan.prompt.user.chars().count();
                    let prompt = plan.prompt.clone();
                    (Participant::Mediator, prompt, Some(plan), DecisionSource::Mediator, context_chars)
                }
                None => {
                    let history = state.transcript.phase(&phase.id);
                    match self.next_speaker(phase, turn_index, &active, history).await {
                        NextTurn::Speak {
                            persona,
                            source,
                            reasoning,
                        } => {
                            self.publish_decision(phase, turn_index, &persona.name, source, reasoning);
                            let bundle = self.persona_context(phase, turn_index, &persona, &active, state);
                            let prompt = bundle.to_prompt(&persona);
                            (Participant::Persona(persona), prompt, None, source, bundle.char_len())
                        }
                        NextTurn::Complete(reasoning) => {
                            info!(phase = %phase.id, turn = turn_index, %reasoning, "phase declared complete");
                            ended_by = PhaseEnd::DecisionComplete;
                            break;
                        }
                        NextTurn::NoneEligible => {
                            warn!(phase = %phase.id, turn = turn_index, "no eligible speaker");
                            ended_by = PhaseEnd::ConfigurationError;
                            break;
                        }
                    }
                }
            };

            let mut record = TurnRecord {
                turn_index,
                speaker: participant.id().to_string(),
                speaker_kind: participant.kind(),
                source,
                context_chars,
                belief_deltas: 0,
                error: None,
            };

            let text = match self.generate(&participant, &prompt, timeout).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(phase = %phase.id, turn = turn_index, speaker = participant.id(), error = %e, "generation failed, skipping turn");
                    self.bus.publish(DiscussionEvent::TurnSkipped {
                        phase_id: phase.id.clone(),
                        turn_index,
                        speaker: participant.id().to_string(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    record.error = Some(e.to_string());
                    turns.push(record);
                    turn_index += 1;
                    continue;
                }
            };

            let mut exchange = Exchange::new(&phase.id, turn_index, participant.id(), text);
            if !participant.holds_beliefs() {
                exchange = exchange.from_mediator();
            }
            if let Err(e) = state.transcript.append(exchange.clone()) {
                warn!(phase = %phase.id, turn = turn_index, error = %e, "transcript rejected exchange");
                ended_by = PhaseEnd::ConfigurationError;
                break;
            }
            self.bus.publish(DiscussionEvent::ExchangeRecorded {
                phase_id: phase.id.clone(),
                turn_index,
                speaker: exchange.speaker_id.clone(),
                speaker_kind: exchange.speaker_kind,
                text: exchange.text.clone(),
                context_chars,
                timestamp: Utc::now(),
            });

            match &plan {
                Some(plan) => {
                    let logged = state.mediator.record_intervention(turn_index, &exchange.text, plan);
                    self.bus.publish(DiscussionEvent::MediatorIntervened {
                        phase_id: phase.id.clone(),
                        turn_index,
                        reason: plan.reason,
                        target: logged.target,
                        question: logged.question,
                        scenarios: logged.scenarios,
                        timestamp: Utc::now(),
                    });
                }
                None => {
                    if let Some(hit) = state
                        .repetition
                        .check_and_record(&exchange.speaker_id, &exchange.text)
                    {
                        debug!(speaker = %hit.speaker, overlap = hit.overlap, "repetition detected");
                        self.bus.publish(DiscussionEvent::RepetitionDetected {
                            phase_id: phase.id.clone(),
                            turn_index,
                            speaker: hit.speaker.clone(),
                            overlap: hit.overlap,
                            timestamp: Utc::now(),
                        });
                        pending_repetition = Some(hit);
                    }
                    analyses.spawn(&exchange);
                }
            }

            let deltas = self.update_memories(&active, state, &exchange).await;
            deltas_by_turn.insert(turn_index, deltas);
            record.belief_deltas = deltas;
            turns.push(record);
            turn_index += 1;
        }

        let analysis = analyses.join_all().await;
        let summary = self.summarize(phase, state.transcript.phase(&phase.id)).await;
        state.whiteboard.push(format!("{}: {}", phase.id, summary));

        let result = PhaseResult {
            phase_id: phase.id.clone(),
            participants: active.iter().map(|p| p.name.clone()).collect(),
            exchanges: state.transcript.phase(&phase.id).len(),
            turns,
            ended_by,
            summary,
            analysis,
            interventions: state.mediator.log().interventions - interventions_before,
        };
        info!(
            phase = %phase.id,
            turns = result.turns_taken(),
            exchanges = result.exchanges,
            ended_by = %result.ended_by,
            ideas_registered = result.analysis.ideas_registered,
            "phase completed"
        );
        self.publish_completed(&result);
        result
    }

    async fn select_participants(
        &self,
        phase: &Phase,
        pool: &[Arc<PersonaProfile>],
    ) -> Vec<Arc<PersonaProfile>> {
        let max = self.config.scheduler.max_participants.max(1);
        let (active, fallback) = match self.decider.select_participants(phase, pool, max).await {
            Ok(selected) if !selected.is_empty() => (selected, false),
            Ok(_) => (rank_by_relevance(phase, pool, max), true),
            Err(e) => {
                warn!(phase = %phase.id, error = %e, "participant selection failed, ranking by relevance");
                (rank_by_relevance(phase, pool, max), true)
            }
        };
        self.bus.publish(DiscussionEvent::ParticipantsSelected {
            phase_id: phase.id.clone(),
            participants: active.iter().map(|p| p.name.clone()).collect(),
            fallback,
            timestamp: Utc::now(),
        });
        active
    }

    /// Trigger reason and stagnation score, or `None`. The mediator never
    /// speaks twice in a row.
    fn mediator_trigger(
        &self,
        phase: &Phase,
        turn_index: u32,
        state: &DiscussionState,
        deltas_by_turn: &HashMap<u32, usize>,
        repetition_detected: bool,
    ) -> Option<(TriggerReason, f64)> {
        let history = state.transcript.phase(&phase.id);
        if history.last().is_some_and(Exchange::is_mediator) {
            return None;
        }
        let observed: Vec<ObservedTurn<'_>> = history
            .iter()
            .map(|e| ObservedTurn::new(e, deltas_by_turn.get(&e.turn_index).copied().unwrap_or(0)))
            .collect();
        let reason = evaluate(
            turn_index,
            &observed,
            repetition_detected,
            phase.phase_type,
            &self.config.triggers,
        )?;
        Some((reason, stagnation_score(&observed, &self.config.triggers)))
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_intervention(
        &self,
        phase: &Phase,
        turn_index: u32,
        active: &[Arc<PersonaProfile>],
        state: &DiscussionState,
        reason: TriggerReason,
        repetition: Option<&RepetitionHit>,
        stagnation: f64,
    ) -> MediatorPlan {
        let advocates: Vec<(&str, &BeliefState)> = active
            .iter()
            .filter_map(|p| state.belief(&p.name).map(|b| (p.name.as_str(), b)))
            .collect();
        debug!(phase = %phase.id, turn = turn_index, %reason, advocates = advocates.len(), "mediator triggered");
        state.mediator.prepare(MediatorBrief {
            phase,
            turn_index,
            exchanges: state.transcript.phase(&phase.id),
            advocates: &advocates,
            reason,
            repetition,
            stagnation,
        })
    }

    /// Decision step, reviewed by the turn policy. Any decision failure
    /// falls back to round-robin.
    async fn next_speaker(
        &self,
        phase: &Phase,
        turn_index: u32,
        active: &[Arc<PersonaProfile>],
        history: &[Exchange],
    ) -> NextTurn {
        let input = DecisionInput {
            phase,
            turn_index,
            pool: active,
            history,
        };
        let decided = match self.decider.decide(input).await {
            Ok(TurnDecision::PhaseComplete { reasoning }) => return NextTurn::Complete(reasoning),
            Ok(TurnDecision::Speak { speaker, reasoning }) => self
                .policy
                .review(&speaker, active, history)
                .map(|name| (name, reasoning)),
            Err(e) => Err(e),
        };
        let (name, source, reasoning) = match decided {
            Ok((name, reasoning)) => (Some(name), self.decider.source(), reasoning),
            Err(e) => {
                warn!(phase = %phase.id, turn = turn_index, error = %e, "turn decision failed, falling back to round-robin");
                let last = history.last().map(|e| e.speaker_id.as_str());
                (
                    round_robin(active, turn_index, last),
                    DecisionSource::RoundRobin,
                    format!("fallback: {e}"),
                )
            }
        };
        match name.and_then(|n| active.iter().find(|p| p.name == n).cloned()) {
            Some(persona) => NextTurn::Speak {
                persona,
                source,
                reasoning,
            },
            None => NextTurn::NoneEligible,
        }
    }

    fn persona_context(
        &self,
        phase: &Phase,
        turn_index: u32,
        persona: &PersonaProfile,
        active: &[Arc<PersonaProfile>],
        state: &DiscussionState,
    ) -> ContextBundle {
        let limits = self.compressor.limits();
        let history = state.transcript.phase(&phase.id);
        let novelty = self.novelty.latest(&phase.id);
        let nudge = self
            .gaps
            .detect(phase, history, active, novelty.as_ref())
            .map(|n| n.render());
        let cards = self.ledger.memory_cards(limits.memory_cards);
        let rejected = self.ledger.recently_rejected(limits.rejected_titles);
        let focus = self.ledger.current_focus();
        self.compressor.build(CompressorInput {
            phase,
            turn_index,
            persona,
            recent: state.transcript.recent(&phase.id, limits.recent_exchanges),
            memory: state.memories.get(&persona.name),
            focus: focus.as_deref(),
            cards: &cards,
            rejected_titles: &rejected,
            nudge: nudge.as_deref(),
            whiteboard: &state.whiteboard,
        })
    }

    async fn generate(
        &self,
        participant: &Participant,
        prompt: &TurnPrompt,
        timeout: std::time::Duration,
    ) -> Result<String> {
        participant
            .produce_turn(
                self.client.as_ref(),
                &self.config.models.participant,
                prompt,
                timeout,
            )
            .await
    }

    /// Update every active agent from one exchange and swap the results
    /// back. Returns the structured deltas added across all agents.
    async fn update_memories(
        &self,
        active: &[Arc<PersonaProfile>],
        state: &mut DiscussionState,
        exchange: &Exchange,
    ) -> usize {
        let agents: Vec<(Arc<PersonaProfile>, AgentMemory)> = active
            .iter()
            .map(|p| (p.clone(), state.memories.get(&p.name).cloned().unwrap_or_default()))
            .collect();
        let mut updated: HashMap<String, (AgentMemory, MemoryUpdateOutcome)> = self
            .updater
            .update_all(agents, exchange)
            .await
            .into_iter()
            .map(|(memory, outcome)| (outcome.agent_id.clone(), (memory, outcome)))
            .collect();

        let mut total = 0;
        for persona in active {
            let Some((memory, outcome)) = updated.remove(&persona.name) else {
                continue;
            };
            total += outcome.deltas_added;
            if outcome.belief_updated {
                self.bus.publish(DiscussionEvent::BeliefUpdated {
                    phase_id: exchange.phase_id.clone(),
                    turn_index: exchange.turn_index,
                    agent: persona.name.clone(),
                    deltas_added: outcome.deltas_added,
                    certainty: memory.belief_state().map(|b| b.certainty),
                    timestamp: Utc::now(),
                });
            }
            state.memories.insert(persona.name.clone(), memory);
        }
        total
    }

    async fn summarize(&self, phase: &Phase, exchanges: &[Exchange]) -> String {
        if exchanges.is_empty() {
            return fallback_summary(phase, 0);
        }
        match self.decider.summarize_phase(phase, exchanges).await {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) => fallback_summary(phase, exchanges.len()),
            Err(e) => {
                warn!(phase = %phase.id, error = %e, "phase summary failed");
                fallback_summary(phase, exchanges.len())
            }
        }
    }

    fn publish_decision(
        &self,
        phase: &Phase,
        turn_index: u32,
        speaker: &str,
        source: DecisionSource,
        reasoning: String,
    ) {
        debug!(phase = %phase.id, turn = turn_index, speaker, %source, "speaker decided");
        self.bus.publish(DiscussionEvent::SpeakerDecided {
            phase_id: phase.id.clone(),
            turn_index,
            speaker: speaker.to_string(),
            source,
            reasoning,
            timestamp: Utc::now(),
        });
    }

    fn publish_completed(&self, result: &PhaseResult) {
        self.bus.publish(DiscussionEvent::PhaseCompleted {
            phase_id: result.phase_id.clone(),
            turns: result.turns_taken(),
            exchanges: result.exchanges,
            ended_by: result.ended_by,
            summary: result.summary.clone(),
            timestamp: Utc::now(),
        });
    }
}

fn check_runnable(phase: &Phase, pool: &[Arc<PersonaProfile>], transcript: &Transcript) -> Result<()> {
    phase.validate()?;
    if pool.is_empty() {
        return Err(DeliberationError::configuration(format!(
            "phase '{}' has an empty participant pool",
            phase.id
        )));
    }
    if let Some(p) = pool.iter().find(|p| p.name.eq_ignore_ascii_case(MEDIATOR_ID)) {
        return Err(DeliberationError::configuration(format!(
            "persona name '{}' is reserved for the mediator",
            p.name
        )));
    }
    if !transcript.phase(&phase.id).is_empty() {
        return Err(DeliberationError::configuration(format!(
            "phase '{}' already ran",
            phase.id
        )));
    }
    Ok(())
}
