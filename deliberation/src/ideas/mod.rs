//! Idea ledger and its side heuristics.
//!
//! - `ledger`: dedup + lifecycle of proposed concepts
//! - `similarity`: pluggable title scoring
//! - `extraction`: gated idea / rejection detection
//! - `gaps`: advisory coverage nudges
//! - `novelty`: phrases already mentioned in the session

pub mod extraction;
pub mod gaps;
pub mod ledger;
pub mod novelty;
pub mod similarity;

pub use extraction::{ExtractedIdea, IdeaExtractor, ProposalGate, RejectionGate, RejectionVerdict};
pub use gaps::{GapDetector, GapNudge};
pub use ledger::{IdeaLedger, IdeaRecord, IdeaStatus, LedgerChange, Refinement, Registration};
pub use novelty::{NoveltyMeasurement, NoveltySet};
pub use similarity::{SequenceRatio, TitleSimilarity};
