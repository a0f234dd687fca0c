//! Deliberation core
//!
//! Orchestrates a structured multi-persona discussion:
//! - a phase scheduler that picks participants, the next speaker, and when
//!   a phase is done, with a hard turn cap as the final backstop
//! - trigger heuristics that detect stagnation and repetition and invoke a
//!   neutral mediator
//! - bounded per-agent memory (summary + belief state) so context size does
//!   not grow with the conversation
//! - an idea ledger that deduplicates proposed concepts and tracks their
//!   lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Session::run                           │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │              PhaseScheduler::run_phase                 │  │
//! │  │  TurnDecider ──► TurnPolicy ──► MemoryCompressor ──┐   │  │
//! │  │  triggers ──► Mediator ───────────────────────────┤   │  │
//! │  │                                                    ▼   │  │
//! │  │                                      CompletionClient  │  │
//! │  │                                                    │   │  │
//! │  │  Transcript ◄── Exchange ──► MemoryUpdater (join) ─┘   │  │
//! │  │                     └──► AnalysisGroup ──► IdeaLedger   │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                      EventBus (fire-and-forget)              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The text-generation backend is reached only through
//! [`completion::CompletionClient`]; persona profiles and phase plans are
//! plain inputs.

#![allow(clippy::uninlined_format_args)]

pub mod belief;
pub mod completion;
pub mod config;
pub mod errors;
pub mod events;
pub mod ideas;
pub mod mediation;
pub mod memory;
pub mod persona;
pub mod phase;
pub mod scheduler;
pub mod text;
pub mod transcript;

pub use completion::{CompletionClient, CompletionRequest, SharedCompletionClient};
pub use config::{DeliberationConfig, RunMode};
pub use errors::{DeliberationError, Result};
pub use events::{DiscussionEvent, EventBus, SharedEventBus};
pub use persona::PersonaProfile;
pub use phase::{Phase, PhaseType};
pub use scheduler::{
    HeuristicFacilitator, LlmFacilitator, PhaseResult, PhaseScheduler, Session, SessionReport,
};
