//! Phase-plan loading.
//!
//! A plan is either TOML with one `[[phases]]` table per phase, or a JSON
//! array of phase objects. The file extension picks the parser.
//!
//! ```toml
//! [[phases]]
//! id = "problem_discovery"
//! goal = "Understand what rural clinics struggle with"
//! desired_outcome = "Ranked list of problems"
//! max_turns = 8
//! phase_type = "debate"
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use deliberation::Phase;
use serde::Deserialize;

use crate::error::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    Toml,
    Json,
}

impl PlanFormat {
    pub fn from_path(path: &Path) -> std::result::Result<Self, LoadError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(Self::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            _ => Err(LoadError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlanFile {
    #[serde(default)]
    phases: Vec<Phase>,
}

pub fn parse_plan(raw: &str, format: PlanFormat) -> Result<Vec<Phase>> {
    let phases = match format {
        PlanFormat::Toml => {
            toml::from_str::<PlanFile>(raw)
                .context("failed to parse TOML plan")?
                .phases
        }
        PlanFormat::Json => serde_json::from_str(raw).context("failed to parse JSON plan")?,
    };
    Ok(phases)
}

/// Read, parse and validate a plan file.
pub fn load_plan(path: &Path) -> Result<Vec<Phase>> {
    let format = PlanFormat::from_path(path)?;
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    let phases = parse_plan(&raw, format)?;
    if phases.is_empty() {
        return Err(LoadError::Empty {
            what: "phases",
            path: path.to_path_buf(),
        }
        .into());
    }
    validate_plan(&phases)?;
    Ok(phases)
}

/// Every phase must be valid on its own, have a positive turn cap, and
/// carry an id unique within the plan.
pub fn validate_plan(phases: &[Phase]) -> std::result::Result<(), LoadError> {
    let mut seen = HashSet::new();
    for phase in phases {
        if let Err(e) = phase.validate() {
            return Err(LoadError::InvalidPhase {
                id: phase.id.clone(),
                reason: e.to_string(),
            });
        }
        if phase.max_turns == 0 {
            return Err(LoadError::InvalidPhase {
                id: phase.id.clone(),
                reason: "max_turns must be at least 1".into(),
            });
        }
        if !seen.insert(phase.id.as_str()) {
            return Err(LoadError::DuplicatePhase(phase.id.clone()));
        }
    }
    Ok(())
}
