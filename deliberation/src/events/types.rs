//! Discussion events, emitted in occurrence order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::belief::Certainty;
use crate::mediation::TriggerReason;
use crate::phase::PhaseType;
use crate::scheduler::{DecisionSource, PhaseEnd};
use crate::transcript::SpeakerKind;

/// Everything the scheduler reports to the logger sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscussionEvent {
    PhaseStarted {
        phase_id: String,
        goal: String,
        phase_type: PhaseType,
        max_turns: u32,
        timestamp: DateTime<Utc>,
    },

    /// Active subset chosen for a phase.
    ParticipantsSelected {
        phase_id: String,
        participants: Vec<String>,
        fallback: bool,
        timestamp: DateTime<Utc>,
    },

    SpeakerDecided {
        phase_id: String,
        turn_index: u32,
        speaker: String,
        source: DecisionSource,
        reasoning: String,
        timestamp: DateTime<Utc>,
    },

    ExchangeRecorded {
        phase_id: String,
        turn_index: u32,
        speaker: String,
        speaker_kind: SpeakerKind,
        text: String,
        /// Characters of rendered context the speaker saw.
        context_chars: usize,
        timestamp: DateTime<Utc>,
    },

    /// Generation failed; the turn index still advanced.
    TurnSkipped {
        phase_id: String,
        turn_index: u32,
        speaker: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    BeliefUpdated {
        phase_id: String,
        turn_index: u32,
        agent: String,
        deltas_added: usize,
        certainty: Option<Certainty>,
        timestamp: DateTime<Utc>,
    },

    IdeaRegistered {
        phase_id: String,
        turn_index: u32,
        title: String,
        timestamp: DateTime<Utc>,
    },

    IdeaRefined {
        phase_id: String,
        turn_index: u32,
        title: String,
        refinements: usize,
        timestamp: DateTime<Utc>,
    },

    IdeaRejected {
        phase_id: String,
        turn_index: u32,
        title: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    MediatorIntervened {
        phase_id: String,
        turn_index: u32,
        reason: TriggerReason,
        target: Option<String>,
        question: Option<String>,
        scenarios: usize,
        timestamp: DateTime<Utc>,
    },

    RepetitionDetected {
        phase_id: String,
        turn_index: u32,
        speaker: String,
        overlap: f64,
        timestamp: DateTime<Utc>,
    },

    NoveltyMeasured {
        phase_id: String,
        turn_index: u32,
        new_phrases: usize,
        total_phrases: usize,
        timestamp: DateTime<Utc>,
    },

    PhaseCompleted {
        phase_id: String,
        turns: u32,
        exchanges: usize,
        ended_by: PhaseEnd,
        summary: String,
        timestamp: DateTime<Utc>,
    },

    SessionCompleted {
        session_id: String,
        phases: usize,
        ideas_in_play: usize,
        ideas_rejected: usize,
        cancelled: bool,
        timestamp: DateTime<Utc>,
    },
}

impl DiscussionEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PhaseStarted { .. } => "phase_started",
            Self::ParticipantsSelected { .. } => "participants_selected",
            Self::SpeakerDecided { .. } => "speaker_decided",
            Self::ExchangeRecorded { .. } => "exchange_recorded",
            Self::TurnSkipped { .. } => "turn_skipped",
            Self::BeliefUpdated { .. } => "belief_updated",
            Self::IdeaRegistered { .. } => "idea_registered",
            Self::IdeaRefined { .. } => "idea_refined",
            Self::IdeaRejected { .. } => "idea_rejected",
            Self::MediatorIntervened { .. } => "mediator_intervened",
            Self::RepetitionDetected { .. } => "repetition_detected",
            Self::NoveltyMeasured { .. } => "novelty_measured",
            Self::PhaseCompleted { .. } => "phase_completed",
            Self::SessionCompleted { .. } => "session_completed",
        }
    }

    /// Phase the event belongs to; `None` for session-level events.
    pub fn phase_id(&self) -> Option<&str> {
        match self {
            Self::PhaseStarted { phase_id, .. }
            | Self::ParticipantsSelected { phase_id, .. }
            | Self::SpeakerDecided { phase_id, .. }
            | Self::ExchangeRecorded { phase_id, .. }
            | Self::TurnSkipped { phase_id, .. }
            | Self::BeliefUpdated { phase_id, .. }
            | Self::IdeaRegistered { phase_id, .. }
            | Self::IdeaRefined { phase_id, .. }
            | Self::IdeaRejected { phase_id, .. }
            | Self::MediatorIntervened { phase_id, .. }
            | Self::RepetitionDetected { phase_id, .. }
            | Self::NoveltyMeasured { phase_id, .. }
            | Self::PhaseCompleted { phase_id, .. } => Some(phase_id),
            Self::SessionCompleted { .. } => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PhaseStarted { timestamp, .. }
            | Self::ParticipantsSelected { timestamp, .. }
            | Self::SpeakerDecided { timestamp, .. }
            | Self::ExchangeRecorded { timestamp, .. }
            | Self::TurnSkipped { timestamp, .. }
            | Self::BeliefUpdated { timestamp, .. }
            | Self::IdeaRegistered { timestamp, .. }
            | Self::IdeaRefined { timestamp, .. }
            | Self::IdeaRejected { timestamp, .. }
            | Self::MediatorIntervened { timestamp, .. }
            | Self::RepetitionDetected { timestamp, .. }
            | Self::NoveltyMeasured { timestamp, .. }
            | Self::PhaseCompleted { timestamp, .. }
            | Self::SessionCompleted { timestamp, .. } => *timestamp,
        }
    }
}
