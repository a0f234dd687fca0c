//! Neutral mediation: when to intervene and what to say.
//!
//! - `triggers`: pure trigger rules, stagnation score, DETECT signals
//! - `repetition`: per-speaker repeated-argument check
//! - `mediator`: brief rendering and reply parsing
//! - `log`: intervention history used to avoid repeats

pub mod log;
pub mod mediator;
pub mod repetition;
pub mod triggers;

pub use log::{MediationLog, Scenario};
pub use mediator::{InterventionRecord, Mediator, MediatorBrief, MediatorPlan};
pub use repetition::{RepetitionDetector, RepetitionHit};
pub use triggers::{
    detect_implicit_agreement, evaluate, should_invoke_mediator, stagnation_score,
    textual_delta_count, AgreementSignal, ObservedTurn, TriggerReason,
};
