//! Belief-state store: per-agent structured memory.
//!
//! - `state`: position, certainty, rules, exceptions, concessions, deltas
//! - `summary`: objective facts and subjective notes
//! - `updater`: incremental, concurrent per-turn updates

pub mod state;
pub mod summary;
pub mod updater;

pub use state::{BeliefDelta, BeliefState, BeliefUpdate, Certainty, Concession};
pub use summary::{AgentSummary, SubjectiveNotes, SummaryUpdate};
pub use updater::{AgentMemory, MemoryUpdateOutcome, MemoryUpdater};
