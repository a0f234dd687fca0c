//! Idea ledger lifecycle through the full scheduler: fuzzy-title dedup,
//! refinement, and terminal rejection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use deliberation::completion::{CompletionRequest, RequestPurpose, ScriptedCompletion};
use deliberation::events::EventBus;
use deliberation::ideas::{IdeaLedger, IdeaStatus};
use deliberation::scheduler::{HeuristicFacilitator, PhaseScheduler};
use deliberation::{DeliberationConfig, PersonaProfile, Phase, PhaseType};

const PITCH: &str = "I propose we build a shared booking calendar for rural clinics that lets \
    nurses reserve specialist video slots, syncs with the records they already keep, and texts \
    patients a reminder the evening before every appointment so fewer visits are missed.";

const OBJECTION: &str = "The fatal flaw in HealthBridge is that nobody will pay for it: clinics \
    have no budget line for software and the grant we counted on ends next spring.";

fn pool() -> Vec<Arc<PersonaProfile>> {
    vec![
        Arc::new(PersonaProfile::new("Ada", "a pragmatic engineer")),
        Arc::new(PersonaProfile::new("Bo", "a rural clinician")),
        Arc::new(PersonaProfile::new("Cy", "a service designer")),
    ]
}

/// Persona turns alternate between the two spellings of one idea, each
/// with a longer overview than the last.
fn pitching_backend() -> ScriptedCompletion {
    let extractions = AtomicUsize::new(0);
    ScriptedCompletion::new(move |req: &CompletionRequest| {
        Ok(match req.purpose {
            RequestPurpose::IdeaExtraction => {
                let n = extractions.fetch_add(1, Ordering::SeqCst);
                let title = if n % 2 == 0 { "HealthBridge" } else { "Health Bridge" };
                format!(
                    r#"{{"has_idea": true, "title": "{title}", "overview": "shared clinic calendar{}", "example": "book a cardiologist"}}"#,
                    " with reminders".repeat(n + 1)
                )
            }
            RequestPurpose::BeliefUpdate | RequestPurpose::SummaryUpdate => "{}".to_string(),
            _ => PITCH.to_string(),
        })
    })
}

fn objecting_backend() -> ScriptedCompletion {
    ScriptedCompletion::new(|req: &CompletionRequest| {
        Ok(match req.purpose {
            RequestPurpose::RejectionCheck => {
                r#"{"rejected": true, "idea_title": "Health Bridge", "rejection_reason": "no one pays"}"#
                    .to_string()
            }
            RequestPurpose::IdeaExtraction => {
                r#"{"has_idea": true, "title": "HealthBridge", "overview": "a much longer overview that would normally refine the record", "example": "x"}"#
                    .to_string()
            }
            RequestPurpose::BeliefUpdate | RequestPurpose::SummaryUpdate => "{}".to_string(),
            _ => format!("{OBJECTION} I propose instead {PITCH}"),
        })
    })
}

fn scheduler(client: ScriptedCompletion) -> PhaseScheduler {
    PhaseScheduler::new(
        client.shared(),
        Arc::new(HeuristicFacilitator::default()),
        DeliberationConfig::default(),
        EventBus::new().shared(),
    )
    .unwrap()
}

#[test]
fn test_ledger_merges_spelling_variants() {
    let ledger = IdeaLedger::default();
    ledger.register_or_refine("HealthBridge", "shared calendar", "book a slot", 1, "ideation");
    ledger.register_or_refine("Health Bridge", "shared calendar with reminders", "", 4, "ideation");
    let in_play = ledger.query_in_play();
    assert_eq!(in_play.len(), 1);
    assert_eq!(in_play[0].title, "HealthBridge");
    assert_eq!(in_play[0].refinements.len(), 1);
    assert_eq!(ledger.current_focus().as_deref(), Some("HealthBridge"));
}

#[tokio::test]
async fn test_spelling_variants_become_one_record() {
    let scheduler = scheduler(pitching_backend());
    let mut state = scheduler.new_state();
    let phase = Phase::new("ideation", "generate ideas", "a shortlist", 4).with_type(PhaseType::Integration);

    let result = scheduler.run_phase(&phase, &pool(), &mut state).await;

    assert_eq!(result.turns_taken(), 4);
    assert_eq!(result.analysis.ideas_registered, 1);
    assert!(result.analysis.ideas_refined >= 1);
    let ledger = scheduler.ledger();
    assert_eq!(ledger.len(), 1);
    assert_eq!(
        ledger.query_in_play()[0].refinements.len(),
        result.analysis.ideas_refined
    );
}

#[tokio::test]
async fn test_rejected_idea_never_returns_to_play() {
    let pitch = scheduler(pitching_backend());
    let mut state = pitch.new_state();
    let ideation = Phase::new("ideation", "generate ideas", "a shortlist", 2).with_type(PhaseType::Integration);
    pitch.run_phase(&ideation, &pool(), &mut state).await;
    assert_eq!(pitch.ledger().query_in_play().len(), 1);

    // Reuse the same ledger through a second scheduler by replaying its
    // record, then let the objections run against it.
    let critique = scheduler(objecting_backend());
    let record = pitch.ledger().query_in_play().remove(0);
    critique
        .ledger()
        .register_or_refine(&record.title, &record.overview, &record.example, 0, "ideation");
    let mut state = critique.new_state();
    let review = Phase::new("critique", "stress-test ideas", "a verdict", 4).with_type(PhaseType::Integration);
    let result = critique.run_phase(&review, &pool(), &mut state).await;

    assert!(result.analysis.ideas_rejected >= 1);
    let ledger = critique.ledger();
    assert!(ledger.query_in_play().is_empty());
    let rejected = ledger.query_rejected();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].status, IdeaStatus::Rejected);
    assert_eq!(rejected[0].rejection_reason.as_deref(), Some("no one pays"));
    assert_eq!(ledger.current_focus(), None);
}
