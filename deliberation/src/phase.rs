//! Phase records: immutable once a run starts.

use serde::{Deserialize, Serialize};

use crate::errors::{DeliberationError, Result};

/// Kind of sub-conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    /// Positions are argued and challenged; the mediator may intervene.
    #[default]
    Debate,
    /// Positions are merged; the mediator stays silent.
    Integration,
}

impl std::fmt::Display for PhaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debate => write!(f, "debate"),
            Self::Integration => write!(f, "integration"),
        }
    }
}

/// A bounded sub-conversation with a goal and a hard turn cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub goal: String,
    pub desired_outcome: String,
    pub max_turns: u32,
    #[serde(default)]
    pub phase_type: PhaseType,
    /// Named stages the turn budget is split across, in order.
    #[serde(default)]
    pub stages: Vec<String>,
}

impl Phase {
    pub fn new(
        id: impl Into<String>,
        goal: impl Into<String>,
        desired_outcome: impl Into<String>,
        max_turns: u32,
    ) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            desired_outcome: desired_outcome.into(),
            max_turns,
            phase_type: PhaseType::Debate,
            stages: Vec::new(),
        }
    }

    pub fn with_type(mut self, phase_type: PhaseType) -> Self {
        self.phase_type = phase_type;
        self
    }

    pub fn with_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages = stages.into_iter().map(Into::into).collect();
        self
    }

    /// Reject phases the scheduler cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(DeliberationError::configuration("phase id is empty"));
        }
        if self.goal.trim().is_empty() {
            return Err(DeliberationError::configuration(format!(
                "phase '{}' has no goal",
                self.id
            )));
        }
        Ok(())
    }

    /// Stage active at `turn_index`: (1-based position, name).
    pub fn stage_for_turn(&self, turn_index: u32) -> Option<(usize, &str)> {
        if self.stages.is_empty() {
            return None;
        }
        let cap = self.max_turns.max(1) as usize;
        let idx = (turn_index as usize * self.stages.len() / cap).min(self.stages.len() - 1);
        Some((idx + 1, self.stages[idx].as_str()))
    }
}
