//! Phase scheduling: who takes part, who speaks next, when a phase ends.
//!
//! - `facilitator`: participant selection, turn decisions, phase summaries
//! - `turn_policy`: deterministic tie-breaks and the round-robin fallback
//! - `analysis`: per-phase group of background idea/novelty analyses
//! - `phase_runner`: the turn loop
//! - `session`: runs a whole plan

pub mod analysis;
pub mod facilitator;
pub mod phase_runner;
pub mod session;
pub mod turn_policy;

pub use analysis::{AnalysisGroup, AnalysisReport};
pub use facilitator::{
    fallback_summary, rank_by_relevance, DecisionInput, DecisionSource, HeuristicFacilitator,
    LlmFacilitator, SharedTurnDecider, TurnDecider, TurnDecision,
};
pub use phase_runner::{DiscussionState, PhaseEnd, PhaseResult, PhaseScheduler, TurnRecord};
pub use session::{Session, SessionReport};
pub use turn_policy::{round_robin, TurnPolicy};
