//! A session runs a phase plan in order and carries state across phases.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::phase_runner::{PhaseResult, PhaseScheduler};
use crate::belief::{AgentSummary, BeliefState};
use crate::config::RunMode;
use crate::events::DiscussionEvent;
use crate::ideas::IdeaRecord;
use crate::mediation::MediationLog;
use crate::persona::PersonaProfile;
use crate::phase::Phase;
use crate::transcript::Exchange;

/// Everything a finished session produced.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub mode: Option<RunMode>,
    pub phases: Vec<PhaseResult>,
    pub ideas: Vec<IdeaRecord>,
    pub rejected: Vec<IdeaRecord>,
    pub final_beliefs: BTreeMap<String, BeliefState>,
    pub summaries: BTreeMap<String, AgentSummary>,
    pub mediation_log: MediationLog,
    pub transcript: Vec<Exchange>,
    pub cancelled: bool,
}

impl SessionReport {
    pub fn exchange_count(&self) -> usize {
        self.transcript.len()
    }
}

pub struct Session {
    scheduler: PhaseScheduler,
    mode: Option<RunMode>,
}

impl Session {
    pub fn new(scheduler: PhaseScheduler) -> Self {
        Self {
            scheduler,
            mode: None,
        }
    }

    /// Select phases and cap their turns with a run-mode preset.
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn scheduler(&self) -> &PhaseScheduler {
        &self.scheduler
    }

    /// Run every selected phase in order. Cancellation stops the session
    /// between phases; the phase in progress still returns its result.
    pub async fn run(&self, plan: &[Phase], pool: &[Arc<PersonaProfile>]) -> SessionReport {
        let session_id = Uuid::new_v4().to_string();
        let phases = match self.mode {
            Some(mode) => mode.select_phases(plan),
            None => plan.to_vec(),
        };
        info!(session_id = %session_id, phases = phases.len(), pool = pool.len(), mode = ?self.mode, "session started");

        let cancel = self.scheduler.cancellation_token();
        let mut state = self.scheduler.new_state();
        let mut results = Vec::with_capacity(phases.len());
        for phase in &phases {
            if cancel.is_cancelled() {
                break;
            }
            results.push(self.scheduler.run_phase(phase, pool, &mut state).await);
        }

        let ledger = self.scheduler.ledger();
        let mut final_beliefs = BTreeMap::new();
        let mut summaries = BTreeMap::new();
        for (name, memory) in &state.memories {
            if let Some(belief) = memory.belief_state() {
                final_beliefs.insert(name.clone(), belief.clone());
            }
            summaries.insert(name.clone(), memory.summary.clone());
        }
        let report = SessionReport {
            session_id,
            mode: self.mode,
            phases: results,
            ideas: ledger.query_in_play(),
            rejected: ledger.query_rejected(),
            final_beliefs,
            summaries,
            mediation_log: state.mediator.into_log(),
            transcript: state.transcript.all().to_vec(),
            cancelled: cancel.is_cancelled(),
        };

        self.scheduler.bus().publish(DiscussionEvent::SessionCompleted {
            session_id: report.session_id.clone(),
            phases: report.phases.len(),
            ideas_in_play: report.ideas.len(),
            ideas_rejected: report.rejected.len(),
            cancelled: report.cancelled,
            timestamp: Utc::now(),
        });
        info!(
            session_id = %report.session_id,
            phases = report.phases.len(),
            exchanges = report.exchange_count(),
            ideas = report.ideas.len(),
            cancelled = report.cancelled,
            "session completed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompletion;
    use crate::config::DeliberationConfig;
    use crate::events::EventBus;
    use crate::scheduler::HeuristicFacilitator;

    fn session(client: ScriptedCompletion) -> Session {
        let scheduler = PhaseScheduler::new(
            client.shared(),
            Arc::new(HeuristicFacilitator::default()),
            DeliberationConfig::default(),
            EventBus::new().shared(),
        )
        .unwrap();
        Session::new(scheduler)
    }

    fn plan() -> Vec<Phase> {
        (0..3)
            .map(|i| Phase::new(format!("p{i}"), "goal", "outcome", 10))
            .collect()
    }

    #[tokio::test]
    async fn test_fast_mode_runs_bookends() {
        let pool = vec![
            Arc::new(PersonaProfile::new("Ada", "engineer")),
            Arc::new(PersonaProfile::new("Bo", "clinician")),
        ];
        let report = session(ScriptedCompletion::failing())
            .with_mode(RunMode::Fast)
            .run(&plan(), &pool)
            .await;
        let ids: Vec<&str> = report.phases.iter().map(|p| p.phase_id.as_str()).collect();
        assert_eq!(ids, vec!["p0", "p2"]);
        // Every generation failed: turns were consumed and skipped.
        assert!(report.phases.iter().all(|p| p.turns_taken() == 3 && p.exchanges == 0));
        assert!(report.transcript.is_empty());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_session_runs_nothing() {
        let session = session(ScriptedCompletion::failing());
        session.scheduler().cancellation_token().cancel();
        let pool = vec![Arc::new(PersonaProfile::new("Ada", "engineer"))];
        let report = session.run(&plan(), &pool).await;
        assert!(report.phases.is_empty());
        assert!(report.cancelled);
    }
}
