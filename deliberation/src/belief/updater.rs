//! Incremental per-agent memory updates.
//!
//! ```text
//! exchange ──┬──► spawn(update(agent_a, clone(memory_a))) ──┐
//!            ├──► spawn(update(agent_b, clone(memory_b))) ──┼──► join all ──► swap back
//!            └──► spawn(update(agent_c, clone(memory_c))) ──┘
//! ```
//!
//! Each task owns its agent's memory outright, so no update can observe or
//! touch another agent's state. A failed call leaves that part unchanged.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::state::{BeliefState, BeliefUpdate};
use super::summary::{AgentSummary, SummaryUpdate};
use crate::completion::{
    complete_with_timeout, parse_json_block, ChatMessage, CompletionRequest, RequestPurpose,
    SharedCompletionClient, ANALYSIS_TEMPERATURE,
};
use crate::errors::{DeliberationError, GenerationFailure, Result};
use crate::persona::PersonaProfile;
use crate::transcript::Exchange;

/// Everything one agent remembers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMemory {
    pub summary: AgentSummary,
    belief: Option<BeliefState>,
    beliefs_enabled: bool,
}

impl Default for AgentMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMemory {
    /// Memory for a persona; the belief state is created by the first
    /// successful update.
    pub fn new() -> Self {
        Self {
            summary: AgentSummary::default(),
            belief: None,
            beliefs_enabled: true,
        }
    }

    /// Memory with the belief state permanently disabled.
    pub fn without_beliefs() -> Self {
        Self {
            beliefs_enabled: false,
            ..Self::new()
        }
    }

    pub fn belief_state(&self) -> Option<&BeliefState> {
        self.belief.as_ref()
    }

    pub fn beliefs_enabled(&self) -> bool {
        self.beliefs_enabled
    }

    /// Lazily create the belief state. `None` when beliefs are disabled.
    pub fn belief_mut(&mut self) -> Option<&mut BeliefState> {
        if !self.beliefs_enabled {
            return None;
        }
        Some(self.belief.get_or_insert_with(BeliefState::default))
    }
}

/// What one agent's update did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryUpdateOutcome {
    pub agent_id: String,
    pub deltas_added: usize,
    pub belief_updated: bool,
    pub summary_updated: bool,
    pub errors: Vec<String>,
}

/// Runs belief and summary updates against the analysis model.
#[derive(Clone)]
pub struct MemoryUpdater {
    client: SharedCompletionClient,
    model: String,
    timeout: Duration,
    update_summaries: bool,
}

impl MemoryUpdater {
    pub fn new(client: SharedCompletionClient, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
            update_summaries: true,
        }
    }

    pub fn with_summary_updates(mut self, enabled: bool) -> Self {
        self.update_summaries = enabled;
        self
    }

    /// Update one agent from one new exchange plus its own prior state.
    pub async fn update(
        &self,
        agent: &PersonaProfile,
        mut memory: AgentMemory,
        exchange: &Exchange,
    ) -> (AgentMemory, MemoryUpdateOutcome) {
        let mut outcome = MemoryUpdateOutcome {
            agent_id: agent.name.clone(),
            ..Default::default()
        };

        if memory.beliefs_enabled() {
            // The state only comes into being once an update lands.
            let blank = BeliefState::default();
            let current = memory.belief_state().unwrap_or(&blank);
            match self.request_belief_update(agent, current, exchange).await {
                Ok(update) => {
                    if let Some(belief) = memory.belief_mut() {
                        outcome.deltas_added = belief.apply(update, exchange.turn_index);
                        outcome.belief_updated = true;
                    }
                }
                Err(e) => {
                    warn!(agent = %agent.name, turn = exchange.turn_index, error = %e, "belief update discarded");
                    outcome.errors.push(e.to_string());
                }
            }
        }

        if self.update_summaries {
            match self.request_summary_update(agent, &memory.summary, exchange).await {
                Ok(update) => {
                    outcome.summary_updated = !update.is_empty();
                    memory.summary.apply(update);
                }
                Err(e) => {
                    warn!(agent = %agent.name, turn = exchange.turn_index, error = %e, "summary update discarded");
                    outcome.errors.push(e.to_string());
                }
            }
        }

        debug!(
            agent = %agent.name,
            turn = exchange.turn_index,
            deltas = outcome.deltas_added,
            "memory updated"
        );
        (memory, outcome)
    }

    /// Update every agent concurrently and wait for all of them.
    ///
    /// Agents whose task panicked are absent from the result; their caller
    /// keeps the previous memory.
    pub async fn update_all(
        &self,
        agents: Vec<(Arc<PersonaProfile>, AgentMemory)>,
        exchange: &Exchange,
    ) -> Vec<(AgentMemory, MemoryUpdateOutcome)> {
        let exchange = Arc::new(exchange.clone());
        let mut join_set: JoinSet<(AgentMemory, MemoryUpdateOutcome)> = JoinSet::new();

        for (agent, memory) in agents {
            let updater = self.clone();
            let exchange = exchange.clone();
            join_set.spawn(async move { updater.update(&agent, memory, &exchange).await });
        }

        let mut results = Vec::new();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "memory update task panicked"),
            }
        }
        results
    }

    async fn request_belief_update(
        &self,
        agent: &PersonaProfile,
        belief: &BeliefState,
        exchange: &Exchange,
    ) -> Result<BeliefUpdate> {
        let current = serde_json::to_string_pretty(belief).unwrap_or_default();
        let who = if exchange.speaker_id == agent.name {
            "You just said".to_string()
        } else {
            format!("{} said", exchange.speaker_id)
        };
        let user = format!(
            "Your current belief state:\n{current}\n\nTurn {turn}. {who}:\n{text}\n\n\
             Return a JSON object describing only what this exchange changed, with keys: \
             position, confidence (0-1), new_conditional_rules, new_exceptions, \
             new_accepted_critiques, new_uncertainties, resolved_uncertainties (indices), \
             new_concessions [{{from_speaker, point}}], new_deltas [{{change, reason}}].",
            turn = exchange.turn_index,
            text = exchange.text,
        );
        let request = CompletionRequest::new(
            &self.model,
            RequestPurpose::BeliefUpdate,
            vec![
                ChatMessage::system(format!(
                    "You track the evolving beliefs of {}, {}. Reply with JSON only.",
                    agent.name, agent.role_description
                )),
                ChatMessage::user(user),
            ],
        )
        .json()
        .with_temperature(ANALYSIS_TEMPERATURE)
        .for_participant(&agent.name);

        let raw = complete_with_timeout(self.client.as_ref(), request, self.timeout).await?;
        parse_json_block(&raw).map_err(|e| {
            DeliberationError::generation(GenerationFailure::Malformed, format!("belief update: {e}"))
        })
    }

    async fn request_summary_update(
        &self,
        agent: &PersonaProfile,
        summary: &AgentSummary,
        exchange: &Exchange,
    ) -> Result<SummaryUpdate> {
        let known = summary
            .objective_facts
            .iter()
            .rev()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        let user = format!(
            "Facts you already noted: {known}\n\nTurn {turn}, {speaker}:\n{text}\n\n\
             Return a JSON object with keys new_facts, new_notes, key_concerns, priorities \
             (each a list of short strings). Only include what is new.",
            turn = exchange.turn_index,
            speaker = exchange.speaker_id,
            text = exchange.text,
        );
        let request = CompletionRequest::new(
            &self.model,
            RequestPurpose::SummaryUpdate,
            vec![
                ChatMessage::system(format!(
                    "You keep concise notes for {}. Reply with JSON only.",
                    agent.name
                )),
                ChatMessage::user(user),
            ],
        )
        .json()
        .with_temperature(ANALYSIS_TEMPERATURE)
        .for_participant(&agent.name);

        let raw = complete_with_timeout(self.client.as_ref(), request, self.timeout).await?;
        parse_json_block(&raw).map_err(|e| {
            DeliberationError::generation(GenerationFailure::Malformed, format!("summary update: {e}"))
        })
    }
}
