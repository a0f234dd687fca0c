use std::path::PathBuf;

use thiserror::Error;

/// Problems with the plan or persona inputs, found before any backend call.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no {what} found in {}", path.display())]
    Empty { what: &'static str, path: PathBuf },

    #[error("unsupported plan format: {} (expected .toml or .json)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("persona '{0}' is defined more than once")]
    DuplicatePersona(String),

    #[error("persona name '{0}' is reserved for the mediator")]
    ReservedPersona(String),

    #[error("persona file {} has no name", .0.display())]
    UnnamedPersona(PathBuf),

    #[error("phase '{0}' appears more than once in the plan")]
    DuplicatePhase(String),

    #[error("phase '{id}' is invalid: {reason}")]
    InvalidPhase { id: String, reason: String },
}
