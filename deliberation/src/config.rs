//! Tunable parameters for the discussion core.
//!
//! Every heuristic threshold and keyword list is configurable. The keyword
//! lists are tuning knobs, not semantics: defaults below are a reasonable
//! English starting point. Load overrides from TOML; missing keys keep
//! their defaults.
//!
//! ```toml
//! [scheduler]
//! max_participants = 4
//!
//! [triggers]
//! stagnation_threshold = 0.6
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Model identifiers per call kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model for persona and mediator turns.
    pub participant: String,
    /// Model for participant selection, turn decisions and phase summaries.
    pub facilitator: String,
    /// Model for belief/summary updates and idea analyses.
    pub analysis: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            participant: "default".into(),
            facilitator: "default".into(),
            analysis: "default".into(),
        }
    }
}

/// Scheduler bounds and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub min_participants: usize,
    pub max_participants: usize,
    /// Turns examined for load balancing.
    pub balance_window: usize,
    /// Consecutive exchanges a disagreeing pair may have before rotation.
    pub max_pair_run: usize,
    /// Deadline for persona and mediator turns.
    pub generation_timeout_secs: u64,
    /// Deadline for facilitator and analysis calls.
    pub analysis_timeout_secs: u64,
    /// Markers that an exchange pushes back on the previous one.
    pub disagreement_markers: Vec<String>,
}

impl SchedulerConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_participants: 3,
            max_participants: 6,
            balance_window: 5,
            max_pair_run: 3,
            generation_timeout_secs: 120,
            analysis_timeout_secs: 60,
            disagreement_markers: strings(&[
                "i disagree",
                "disagree with",
                "on the contrary",
                "i don't think",
                "that's not right",
                "but ",
                "however",
            ]),
        }
    }
}

/// Mediator trigger heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub min_turns: u32,
    pub stagnation_threshold: f64,
    /// Turns considered by the stagnation score and the zero-delta rule.
    pub stagnation_window: usize,
    /// Zero-delta rule applies from this turn on.
    pub zero_delta_min_turn: u32,
    pub cadence_period: u32,
    pub cadence_offset: u32,
    pub repetition_overlap: f64,
    /// Own prior turns compared for repetition.
    pub repetition_history: usize,
    /// Own prior turns retained per speaker.
    pub speaker_history: usize,
    pub no_change_phrases: Vec<String>,
    pub delta_indicators: Vec<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            min_turns: 2,
            stagnation_threshold: 0.7,
            stagnation_window: 4,
            zero_delta_min_turn: 4,
            cadence_period: 4,
            cadence_offset: 3,
            repetition_overlap: 0.3,
            repetition_history: 3,
            speaker_history: 5,
            no_change_phrases: strings(&["no change because"]),
            delta_indicators: strings(&[
                "certainty:",
                "add condition",
                "add exception",
                "accept critique",
                "add conditional rule",
                "shifted my belief",
                "changed my view",
            ]),
        }
    }
}

/// Size limits for the rendered context bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryLimits {
    pub recent_exchanges: usize,
    pub exchange_chars: usize,
    pub summary_facts: usize,
    pub fact_chars: usize,
    pub note_chars: usize,
    pub belief_list_items: usize,
    pub belief_item_chars: usize,
    pub belief_history_items: usize,
    pub position_chars: usize,
    pub memory_cards: usize,
    pub card_title_chars: usize,
    pub card_overview_chars: usize,
    pub card_example_chars: usize,
    pub rejected_titles: usize,
    pub whiteboard_items: usize,
    pub whiteboard_chars: usize,
    pub nudge_chars: usize,
    /// Hard cap applied to each rendered section.
    pub section_chars: usize,
    pub first_turn_words: u32,
    pub early_turn_words: u32,
    pub late_turn_words: u32,
    /// Last turn index that still gets the early budget.
    pub early_until_turn: u32,
}

impl MemoryLimits {
    /// Upper bound on every variable section of a bundle combined.
    pub fn max_variable_chars(&self) -> usize {
        // recent exchanges, summary, belief, cards, nudge, whiteboard
        self.section_chars * 5 + self.nudge_chars
    }
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            recent_exchanges: 2,
            exchange_chars: 200,
            summary_facts: 2,
            fact_chars: 50,
            note_chars: 80,
            belief_list_items: 3,
            belief_item_chars: 60,
            belief_history_items: 2,
            position_chars: 160,
            memory_cards: 3,
            card_title_chars: 80,
            card_overview_chars: 400,
            card_example_chars: 200,
            rejected_titles: 2,
            whiteboard_items: 2,
            whiteboard_chars: 300,
            nudge_chars: 200,
            section_chars: 1600,
            first_turn_words: 300,
            early_turn_words: 200,
            late_turn_words: 150,
            early_until_turn: 2,
        }
    }
}

/// Idea extraction gates and dedup threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeaConfig {
    pub similarity_threshold: f64,
    /// Case-insensitive regexes signalling a concrete proposal.
    pub proposal_patterns: Vec<String>,
    /// Characters required after the proposal marker.
    pub min_proposal_chars: usize,
    pub rejection_keywords: Vec<String>,
}

impl Default for IdeaConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            proposal_patterns: strings(&[
                r"\bi propose\b",
                r"\bi suggest\b",
                r"\bwhat if we (?:built|created)\b",
                r"\bconsider\b.{0,80}\bthat\b",
                r"\b(?:solution|approach|concept|idea):.{0,200}\b(?:would|could|will)\b",
                r"\bthis would work by\b",
                r"\bhere'?s how it would work\b",
                r"\bthe solution would\b",
                r"\bour product would\b",
            ]),
            min_proposal_chars: 150,
            rejection_keywords: strings(&[
                "won't work",
                "will not work",
                "doesn't work",
                "fatal flaw",
                "major problem",
                "abandon",
                "reject",
                "not feasible",
                "too risky",
                "deal-breaker",
                "show-stopper",
                "infeasible",
                "impractical",
            ]),
        }
    }
}

/// Phase-id keywords mapped to a topic the phase is expected to cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicExpectation {
    pub phase_keywords: Vec<String>,
    pub topic: String,
    /// Any of these in the discussion counts as coverage.
    pub markers: Vec<String>,
}

/// Gap-nudge heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapConfig {
    pub silent_window: usize,
    pub min_exchanges_for_participation: usize,
    pub min_exchanges_for_topics: usize,
    pub short_turn_chars: usize,
    pub agreement_phrases: Vec<String>,
    pub topics: Vec<TopicExpectation>,
}

impl Default for GapConfig {
    fn default() -> Self {
        let topic = |keywords: &[&str], topic: &str, markers: &[&str]| TopicExpectation {
            phase_keywords: strings(keywords),
            topic: topic.into(),
            markers: strings(markers),
        };
        Self {
            silent_window: 6,
            min_exchanges_for_participation: 4,
            min_exchanges_for_topics: 5,
            short_turn_chars: 100,
            agreement_phrases: strings(&[
                "agree",
                "good point",
                "exactly",
                "right",
                "yes",
                "that makes sense",
            ]),
            topics: vec![
                topic(
                    &["discovery", "problem"],
                    "who is most affected by the problem",
                    &["user", "customer", "patient", "people who", "affected"],
                ),
                topic(
                    &["discovery", "problem"],
                    "how the problem is handled today",
                    &["currently", "today", "existing", "workaround"],
                ),
                topic(
                    &["solution", "ideation"],
                    "a concrete example of the idea in use",
                    &["for example", "for instance", "imagine", "e.g."],
                ),
                topic(
                    &["synthesis", "final"],
                    "the biggest open risk",
                    &["risk", "concern", "could fail", "downside"],
                ),
                topic(
                    &["competitive", "landscape"],
                    "existing alternatives",
                    &["competitor", "alternative", "already exists", "incumbent"],
                ),
            ],
        }
    }
}

/// Mediator behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    pub abstraction_terms: Vec<String>,
    pub abstraction_window: usize,
    pub abstraction_repeats: usize,
    /// Definitions are only forced from this turn on.
    pub definition_min_turn: u32,
    /// Past questions shown as "do not repeat".
    pub recent_questions: usize,
    /// Named reasoning tools the mediator may introduce once each.
    pub conceptual_tools: Vec<String>,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            abstraction_terms: strings(&[
                "justice",
                "fairness",
                "rights",
                "duty",
                "good",
                "harm",
                "rational",
                "valid",
                "moral",
                "ethical",
                "value",
                "virtue",
                "ought",
                "should",
                "must",
                "obligated",
                "responsible",
            ]),
            abstraction_window: 5,
            abstraction_repeats: 3,
            definition_min_turn: 4,
            recent_questions: 3,
            conceptual_tools: strings(&[
                "rule-utilitarian",
                "threshold",
                "side-constraint",
                "categorical imperative",
                "veil of ignorance",
            ]),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliberationConfig {
    pub models: ModelConfig,
    pub scheduler: SchedulerConfig,
    pub triggers: TriggerConfig,
    pub memory: MemoryLimits,
    pub ideas: IdeaConfig,
    pub gaps: GapConfig,
    pub mediator: MediatorConfig,
    /// Re-summarize every agent after each exchange.
    pub update_summaries: bool,
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self {
            models: ModelConfig::default(),
            scheduler: SchedulerConfig::default(),
            triggers: TriggerConfig::default(),
            memory: MemoryLimits::default(),
            ideas: IdeaConfig::default(),
            gaps: GapConfig::default(),
            mediator: MediatorConfig::default(),
            update_summaries: true,
        }
    }
}

impl DeliberationConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed to parse deliberation config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    /// Apply a run-mode preset on top of this configuration.
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.update_summaries = mode.updates_summaries();
        self
    }
}

/// Which phases of a plan a run mode keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseSelection {
    /// First and last phase only.
    Bookends,
    /// First, middle and last phase (up to four).
    BookendsPlusMiddle,
    All,
}

/// Speed/depth presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Fast,
    Medium,
    Standard,
    Deep,
}

impl RunMode {
    pub fn turns_per_phase(self) -> u32 {
        match self {
            Self::Fast => 3,
            Self::Medium => 5,
            Self::Standard => 8,
            Self::Deep => 15,
        }
    }

    pub fn phase_selection(self) -> PhaseSelection {
        match self {
            Self::Fast => PhaseSelection::Bookends,
            Self::Medium => PhaseSelection::BookendsPlusMiddle,
            Self::Standard | Self::Deep => PhaseSelection::All,
        }
    }

    pub fn updates_summaries(self) -> bool {
        !matches!(self, Self::Fast)
    }

    /// Select phases and override their turn caps.
    pub fn select_phases(self, plan: &[Phase]) -> Vec<Phase> {
        let indices: Vec<usize> = match (self.phase_selection(), plan.len()) {
            (_, 0) => Vec::new(),
            (PhaseSelection::All, n) => (0..n).collect(),
            (PhaseSelection::Bookends, 1) => vec![0],
            (PhaseSelection::Bookends, n) => vec![0, n - 1],
            (PhaseSelection::BookendsPlusMiddle, n) if n <= 4 => (0..n).collect(),
            (PhaseSelection::BookendsPlusMiddle, n) => vec![0, n / 3, (2 * n) / 3, n - 1],
        };
        indices
            .into_iter()
            .map(|i| {
                let mut phase = plan[i].clone();
                phase.max_turns = self.turns_per_phase();
                phase
            })
            .collect()
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Medium => write!(f, "medium"),
            Self::Standard => write!(f, "standard"),
            Self::Deep => write!(f, "deep"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "medium" => Ok(Self::Medium),
            "standard" => Ok(Self::Standard),
            "deep" => Ok(Self::Deep),
            other => Err(format!("unknown run mode '{other}'")),
        }
    }
}
