//! Memory compressor and response budgeting.
//!
//! Keeps arbitrarily long discussions tractable: each generation request
//! sees a bundle whose size does not depend on how many turns came before.

pub mod budget;
pub mod compressor;

pub use budget::{ResponseBudget, TokenEstimator, WordCountEstimator};
pub use compressor::{CompressorInput, ContextBundle, MemoryCompressor};
