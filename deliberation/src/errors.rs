//! Error taxonomy for the discussion core.
//!
//! Every failure inside a phase run is one of four kinds. None of them is
//! allowed to escape a phase: callers ask [`DeliberationError::recovery`]
//! what to do instead of matching on message strings.
//!
//! | Kind          | Raised by                          | Recovery            |
//! |---------------|------------------------------------|---------------------|
//! | Generation    | completion call, timeout, bad JSON | skip the turn       |
//! | Decision      | turn-decision step                 | round-robin speaker |
//! | Extraction    | idea / rejection analysis          | discard the attempt |
//! | Configuration | invalid phase or empty pool        | empty phase result  |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a completion call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationFailure {
    /// The call exceeded its deadline.
    Timeout,
    /// The backend rejected the request or the transport failed.
    Backend,
    /// The backend answered, but not in the expected shape.
    Malformed,
    /// The backend answered with no text at all.
    EmptyResponse,
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Backend => write!(f, "backend"),
            Self::Malformed => write!(f, "malformed"),
            Self::EmptyResponse => write!(f, "empty_response"),
        }
    }
}

/// What the scheduler does after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Log, advance `turn_index`, keep going.
    SkipTurn,
    /// Pick the next speaker deterministically from the active pool.
    RoundRobin,
    /// Drop this single extraction; the ledger is untouched.
    DiscardExtraction,
    /// Abandon the phase and return an empty result.
    EmptyPhase,
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkipTurn => write!(f, "skip_turn"),
            Self::RoundRobin => write!(f, "round_robin"),
            Self::DiscardExtraction => write!(f, "discard_extraction"),
            Self::EmptyPhase => write!(f, "empty_phase"),
        }
    }
}

/// Errors raised inside the discussion core.
#[derive(Debug, Clone, Error)]
pub enum DeliberationError {
    #[error("generation failed ({kind}): {message}")]
    Generation {
        kind: GenerationFailure,
        message: String,
    },

    #[error("turn decision failed: {0}")]
    Decision(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl DeliberationError {
    pub fn generation(kind: GenerationFailure, message: impl Into<String>) -> Self {
        Self::Generation {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(elapsed_secs: u64) -> Self {
        Self::generation(
            GenerationFailure::Timeout,
            format!("no response after {elapsed_secs}s"),
        )
    }

    pub fn decision(message: impl Into<String>) -> Self {
        Self::Decision(message.into())
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// The local recovery the scheduler applies for this error.
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Generation { .. } => Recovery::SkipTurn,
            Self::Decision(_) => Recovery::RoundRobin,
            Self::Extraction(_) => Recovery::DiscardExtraction,
            Self::Configuration(_) => Recovery::EmptyPhase,
        }
    }

    /// Only configuration errors end a phase early.
    pub fn is_fatal_for_phase(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Generation failure kind, if this is a generation error.
    pub fn generation_kind(&self) -> Option<GenerationFailure> {
        match self {
            Self::Generation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Re-tag a generation error raised while deciding the next speaker.
    pub fn into_decision(self) -> Self {
        match self {
            Self::Decision(_) => self,
            other => Self::Decision(other.to_string()),
        }
    }

    /// Re-tag an error raised during idea or rejection analysis.
    pub fn into_extraction(self) -> Self {
        match self {
            Self::Extraction(_) => self,
            other => Self::Extraction(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeliberationError>;
