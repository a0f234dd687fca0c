//! Phase scheduler integration tests with a scripted completion backend
//! (no network calls).
//!
//! Covers: termination, skipped turns, empty pools, mediator cadence and
//! stagnation triggers, mediator neutrality, belief isolation and bounded
//! context size.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use deliberation::completion::{CompletionRequest, RequestPurpose, ScriptedCompletion};
use deliberation::errors::{DeliberationError, GenerationFailure, Result};
use deliberation::events::{DiscussionEvent, EventBus};
use deliberation::mediation::TriggerReason;
use deliberation::persona::MEDIATOR_ID;
use deliberation::scheduler::{
    DecisionInput, DecisionSource, HeuristicFacilitator, PhaseEnd, PhaseScheduler, Session,
    SharedTurnDecider, TurnDecider, TurnDecision,
};
use deliberation::transcript::Exchange;
use deliberation::{DeliberationConfig, PersonaProfile, Phase, PhaseType};

const ONE_DELTA: &str = r#"{"new_deltas": [{"change": "weighed a new point", "reason": "heard it"}]}"#;

fn pool() -> Vec<Arc<PersonaProfile>> {
    vec![
        Arc::new(PersonaProfile::new("Ada", "a pragmatic engineer")),
        Arc::new(PersonaProfile::new("Bo", "a rural clinician")),
        Arc::new(PersonaProfile::new("Cy", "a service designer")),
    ]
}

/// Unique words per call so no phrase ever repeats.
fn fresh_text(n: usize, words: usize) -> String {
    (0..words)
        .map(|i| format!("w{n}x{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fresh text for every turn; `belief` answers every belief update.
fn backend(belief: &'static str, words: usize) -> ScriptedCompletion {
    let counter = AtomicUsize::new(0);
    ScriptedCompletion::new(move |req: &CompletionRequest| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Ok(match req.purpose {
            RequestPurpose::BeliefUpdate => belief.to_string(),
            RequestPurpose::SummaryUpdate => "{}".to_string(),
            _ => fresh_text(n, words),
        })
    })
}

fn heuristic() -> SharedTurnDecider {
    Arc::new(HeuristicFacilitator::default())
}

fn scheduler_with(client: ScriptedCompletion, decider: SharedTurnDecider, bus: Arc<EventBus>) -> PhaseScheduler {
    PhaseScheduler::new(client.shared(), decider, DeliberationConfig::default(), bus).unwrap()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<DiscussionEvent>) -> Vec<DiscussionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// A decider that never ends a phase and always names the same persona.
struct AlwaysContinue;

#[async_trait]
impl TurnDecider for AlwaysContinue {
    async fn select_participants(
        &self,
        _phase: &Phase,
        pool: &[Arc<PersonaProfile>],
        _max: usize,
    ) -> Result<Vec<Arc<PersonaProfile>>> {
        Ok(pool.to_vec())
    }

    async fn decide(&self, _input: DecisionInput<'_>) -> Result<TurnDecision> {
        Ok(TurnDecision::Speak {
            speaker: "Ada".into(),
            reasoning: "keep going".into(),
        })
    }

    async fn summarize_phase(&self, _phase: &Phase, _exchanges: &[Exchange]) -> Result<String> {
        Err(DeliberationError::generation(GenerationFailure::Backend, "no summaries"))
    }

    fn source(&self) -> DecisionSource {
        DecisionSource::Facilitator
    }
}

/// A decider whose every decision is malformed.
struct Broken;

#[async_trait]
impl TurnDecider for Broken {
    async fn select_participants(
        &self,
        _phase: &Phase,
        _pool: &[Arc<PersonaProfile>],
        _max: usize,
    ) -> Result<Vec<Arc<PersonaProfile>>> {
        Err(DeliberationError::decision("selection payload: expected value"))
    }

    async fn decide(&self, _input: DecisionInput<'_>) -> Result<TurnDecision> {
        Err(DeliberationError::decision("decision payload: expected value"))
    }

    async fn summarize_phase(&self, _phase: &Phase, _exchanges: &[Exchange]) -> Result<String> {
        Ok("Short summary.".into())
    }

    fn source(&self) -> DecisionSource {
        DecisionSource::Facilitator
    }
}

// ── Termination ────────────────────────────────────────────────────

#[tokio::test]
async fn test_turn_cap_ends_phase_even_if_decider_never_stops() {
    let scheduler = scheduler_with(backend(ONE_DELTA, 12), Arc::new(AlwaysContinue), EventBus::new().shared());
    let mut state = scheduler.new_state();
    let phase = Phase::new("ideation", "generate ideas", "a shortlist", 7);

    let result = scheduler.run_phase(&phase, &pool(), &mut state).await;

    assert_eq!(result.ended_by, PhaseEnd::TurnCap);
    assert_eq!(result.turns_taken(), 7);
    // Reviewed decisions never let Ada speak twice in a row.
    let speakers: Vec<&str> = state
        .transcript
        .phase("ideation")
        .iter()
        .map(|e| e.speaker_id.as_str())
        .collect();
    assert!(speakers.windows(2).all(|w| w[0] != w[1]));
    assert_eq!(result.summary, "Phase 'ideation' completed with 7 exchanges.");
}

#[tokio::test]
async fn test_decision_failures_fall_back_to_round_robin() {
    let bus = EventBus::new().shared();
    let mut rx = bus.subscribe();
    let scheduler = scheduler_with(backend(ONE_DELTA, 12), Arc::new(Broken), bus);
    let mut state = scheduler.new_state();
    let phase = Phase::new("ideation", "generate ideas", "a shortlist", 3).with_type(PhaseType::Integration);

    let result = scheduler.run_phase(&phase, &pool(), &mut state).await;

    assert_eq!(result.turns_taken(), 3);
    assert!(result.turns.iter().all(|t| t.source == DecisionSource::RoundRobin));
    assert_eq!(result.summary, "Short summary.");
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        DiscussionEvent::ParticipantsSelected { fallback: true, .. }
    )));
}

#[tokio::test]
async fn test_generation_failure_skips_turn() {
    let counter = AtomicUsize::new(0);
    let client = ScriptedCompletion::new(move |req: &CompletionRequest| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        match req.purpose {
            RequestPurpose::PersonaTurn if req.participant.as_deref() == Some("Bo") => Err(
                DeliberationError::generation(GenerationFailure::Backend, "backend rejected request"),
            ),
            RequestPurpose::BeliefUpdate => Ok(ONE_DELTA.to_string()),
            RequestPurpose::SummaryUpdate => Ok("{}".to_string()),
            _ => Ok(fresh_text(n, 12)),
        }
    });
    let bus = EventBus::new().shared();
    let mut rx = bus.subscribe();
    let scheduler = scheduler_with(client, heuristic(), bus);
    let mut state = scheduler.new_state();
    let phase = Phase::new("ideation", "generate ideas", "a shortlist", 6);

    let result = scheduler.run_phase(&phase, &pool(), &mut state).await;

    assert_eq!(result.turns_taken(), 6);
    let skipped = result.turns.iter().filter(|t| t.skipped()).count();
    assert!(skipped >= 1);
    assert_eq!(result.exchanges, 6 - skipped);
    assert!(state.transcript.all().iter().all(|e| e.speaker_id != "Bo"));
    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, DiscussionEvent::TurnSkipped { speaker, .. } if speaker == "Bo")));
}

#[tokio::test]
async fn test_empty_pool_yields_empty_result() {
    let scheduler = scheduler_with(backend(ONE_DELTA, 12), heuristic(), EventBus::new().shared());
    let mut state = scheduler.new_state();
    let phase = Phase::new("ideation", "generate ideas", "a shortlist", 6);

    let result = scheduler.run_phase(&phase, &[], &mut state).await;

    assert_eq!(result.ended_by, PhaseEnd::ConfigurationError);
    assert_eq!(result.exchanges, 0);
    assert!(result.turns.is_empty());
}

#[tokio::test]
async fn test_invalid_phase_yields_empty_result() {
    let scheduler = scheduler_with(backend(ONE_DELTA, 12), heuristic(), EventBus::new().shared());
    let mut state = scheduler.new_state();
    let phase = Phase::new("ideation", "  ", "a shortlist", 6);

    let result = scheduler.run_phase(&phase, &pool(), &mut state).await;

    assert_eq!(result.ended_by, PhaseEnd::ConfigurationError);
    assert!(state.transcript.is_empty());
}

// ── Mediator triggers ──────────────────────────────────────────────

#[tokio::test]
async fn test_mediator_cadence_without_stagnation() {
    let scheduler = scheduler_with(backend(ONE_DELTA, 12), heuristic(), EventBus::new().shared());
    let mut state = scheduler.new_state();
    let phase = Phase::new("debate", "argue priorities", "ranked priorities", 12);

    let result = scheduler.run_phase(&phase, &pool(), &mut state).await;

    assert_eq!(result.mediator_turns(), vec![3, 7, 11]);
    assert_eq!(result.interventions, 3);
}

#[tokio::test]
async fn test_no_mediator_during_integration() {
    let scheduler = scheduler_with(backend("{}", 12), heuristic(), EventBus::new().shared());
    let mut state = scheduler.new_state();
    let phase = Phase::new("synthesis", "merge ideas", "one plan", 12).with_type(PhaseType::Integration);

    let result = scheduler.run_phase(&phase, &pool(), &mut state).await;

    assert!(result.mediator_turns().is_empty());
}

#[tokio::test]
async fn test_stagnation_invokes_mediator() {
    let counter = AtomicUsize::new(0);
    let client = ScriptedCompletion::new(move |req: &CompletionRequest| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Ok(match req.purpose {
            RequestPurpose::BeliefUpdate | RequestPurpose::SummaryUpdate => "{}".to_string(),
            _ => format!("No change because {}", fresh_text(n, 8)),
        })
    });
    let bus = EventBus::new().shared();
    let mut rx = bus.subscribe();
    let scheduler = scheduler_with(client, heuristic(), bus);
    let mut state = scheduler.new_state();
    let phase = Phase::new("debate", "argue priorities", "ranked priorities", 5);

    let result = scheduler.run_phase(&phase, &pool(), &mut state).await;

    assert_eq!(result.mediator_turns().first(), Some(&3));
    let reasons: Vec<TriggerReason> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            DiscussionEvent::MediatorIntervened { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons.first(), Some(&TriggerReason::Stagnation));
}

#[tokio::test]
async fn test_mediator_never_holds_beliefs() {
    let bus = EventBus::new().shared();
    let mut rx = bus.subscribe();
    let scheduler = scheduler_with(backend(ONE_DELTA, 12), heuristic(), bus);
    let mut state = scheduler.new_state();
    let phase = Phase::new("debate", "argue priorities", "ranked priorities", 12);

    let result = scheduler.run_phase(&phase, &pool(), &mut state).await;

    assert!(result.interventions > 0);
    assert!(state.belief(MEDIATOR_ID).is_none());
    assert!(!state.memories.contains_key(MEDIATOR_ID));
    let events = drain(&mut rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, DiscussionEvent::BeliefUpdated { agent, .. } if agent == MEDIATOR_ID)));
}

#[tokio::test]
async fn test_persona_cannot_take_the_mediator_name() {
    let client = ScriptedCompletion::new(|req: &CompletionRequest| {
        Ok(match req.purpose {
            RequestPurpose::BeliefUpdate => r#"{"position": "I side with Ada"}"#.to_string(),
            RequestPurpose::SummaryUpdate => "{}".to_string(),
            _ => "Scheduling is the real bottleneck for clinics.".to_string(),
        })
    });
    let scheduler = scheduler_with(client, heuristic(), EventBus::new().shared());
    let pool = vec![
        Arc::new(PersonaProfile::new("Ada", "a pragmatic engineer")),
        Arc::new(PersonaProfile::new("Mediator", "an impostor")),
        Arc::new(PersonaProfile::new("Cy", "a service designer")),
    ];
    let plan = vec![Phase::new("debate", "argue priorities", "ranked priorities", 4)];

    let report = Session::new(scheduler).run(&plan, &pool).await;

    assert_eq!(report.phases[0].ended_by, PhaseEnd::ConfigurationError);
    assert!(!report.final_beliefs.contains_key(MEDIATOR_ID));
    assert!(report.transcript.is_empty());
}

// ── Memory ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_belief_states_stay_isolated() {
    let counter = AtomicUsize::new(0);
    let client = ScriptedCompletion::new(move |req: &CompletionRequest| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Ok(match (req.purpose, req.participant.as_deref()) {
            (RequestPurpose::BeliefUpdate, Some("Ada")) => {
                r#"{"position": "ship scheduling first", "new_conditional_rules": ["only if clinics opt in"]}"#
                    .to_string()
            }
            (RequestPurpose::BeliefUpdate, _) => {
                r#"{"position": "payments first", "new_exceptions": ["unless grants cover fees"]}"#.to_string()
            }
            (RequestPurpose::SummaryUpdate, _) => "{}".to_string(),
            _ => fresh_text(n, 12),
        })
    });
    let scheduler = scheduler_with(client, heuristic(), EventBus::new().shared());
    let mut state = scheduler.new_state();
    let phase = Phase::new("debate", "argue priorities", "ranked priorities", 4);

    scheduler.run_phase(&phase, &pool(), &mut state).await;

    let ada = state.belief("Ada").unwrap();
    let bo = state.belief("Bo").unwrap();
    assert_eq!(ada.position.as_deref(), Some("ship scheduling first"));
    assert_eq!(ada.conditional_rules, vec!["only if clinics opt in".to_string()]);
    assert!(ada.exceptions.is_empty());
    assert_eq!(bo.position.as_deref(), Some("payments first"));
    assert!(bo.conditional_rules.is_empty());
}

#[tokio::test]
async fn test_context_size_is_bounded_over_fifty_turns() {
    let config = DeliberationConfig::default();
    let scheduler = scheduler_with(backend(ONE_DELTA, 80), heuristic(), EventBus::new().shared());
    let mut state = scheduler.new_state();
    let phase = Phase::new("debate", "argue priorities", "ranked priorities", 50);

    let result = scheduler.run_phase(&phase, &pool(), &mut state).await;

    assert_eq!(result.turns_taken(), 50);
    let persona_bound = config.memory.max_variable_chars() + 2_000;
    let persona_max = result
        .turns
        .iter()
        .filter(|t| t.speaker != MEDIATOR_ID)
        .map(|t| t.context_chars)
        .max()
        .unwrap();
    assert!(persona_max <= persona_bound, "{persona_max} > {persona_bound}");

    let early = result.turns[..10].iter().map(|t| t.context_chars).max().unwrap();
    let late = result.turns[40..].iter().map(|t| t.context_chars).max().unwrap();
    assert!(late <= early * 2, "late {late} vs early {early}");
}
