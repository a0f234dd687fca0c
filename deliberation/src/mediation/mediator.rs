//! The neutral mediator.
//!
//! ```text
//!            ┌──────────── read-only ─────────────┐
//! advocate belief states ──┐                      │
//! recent exchanges ────────┼──► prepare() ──► MediatorPlan (prompt + target)
//! trigger + DETECT signals ┤                          │
//! MediationLog ────────────┘                          ▼
//!                                              generation (scheduler)
//!                                                     │
//! MediationLog ◄──────── record_intervention() ◄──────┘
//! ```
//!
//! The mediator holds no belief state. Its only mutable state is the
//! `MediationLog`, which exists to keep it from repeating itself.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::log::{MediationLog, Scenario};
use super::repetition::RepetitionHit;
use super::triggers::{detect_implicit_agreement, term_to_define, AgreementSignal, TriggerReason};
use crate::belief::BeliefState;
use crate::config::{MediatorConfig, MemoryLimits};
use crate::memory::budget::{ResponseBudget, WordCountEstimator};
use crate::persona::TurnPrompt;
use crate::phase::{Phase, PhaseType};
use crate::text::truncate_chars;
use crate::transcript::Exchange;

const RECENT_TURNS: usize = 5;
const EXCHANGE_PREVIEW_CHARS: usize = 150;
const POSITION_PREVIEW_CHARS: usize = 80;
const ITEM_PREVIEW_CHARS: usize = 60;
const ITEMS_PER_LIST: usize = 2;

const SYSTEM_PROMPT: &str = "Role: Socratic Mediator.
Objective: reduce abstraction and surface testable disagreements by asking one clarifying \
question (QUESTION), pointing out repetition, stagnation or unacknowledged agreement (DETECT), \
linking frameworks or introducing one conceptual tool (BRIDGE), and, when the discussion is \
abstract, generating 2-3 contrasting toy scenarios (SCENARIOS).
Strict neutrality: never say which position is correct or better, never use normative \
language, never take sides. You are a referee, not a participant.";

/// Everything the mediator may read before intervening.
#[derive(Debug, Clone, Copy)]
pub struct MediatorBrief<'a> {
    pub phase: &'a Phase,
    pub turn_index: u32,
    /// Phase exchanges so far, oldest first.
    pub exchanges: &'a [Exchange],
    /// Belief states of the active personas, in pool order.
    pub advocates: &'a [(&'a str, &'a BeliefState)],
    pub reason: TriggerReason,
    pub repetition: Option<&'a RepetitionHit>,
    pub stagnation: f64,
}

/// What the mediator intends to do this turn, plus its rendered prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct MediatorPlan {
    pub prompt: TurnPrompt,
    pub target: Option<String>,
    pub reason: TriggerReason,
    pub agreement: Option<AgreementSignal>,
    pub definition: Option<String>,
    pub repeating_speaker: Option<String>,
}

/// What was logged from one intervention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterventionRecord {
    pub turn: u32,
    pub target: Option<String>,
    pub question: Option<String>,
    pub tools: Vec<String>,
    pub scenarios: usize,
    pub definition: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Mediator {
    config: MediatorConfig,
    limits: MemoryLimits,
    log: MediationLog,
}

impl Mediator {
    pub fn new(config: MediatorConfig, limits: MemoryLimits) -> Self {
        Self::with_log(config, limits, MediationLog::new())
    }

    /// Resume with the log of an earlier phase.
    pub fn with_log(config: MediatorConfig, limits: MemoryLimits, log: MediationLog) -> Self {
        Self {
            config,
            limits,
            log,
        }
    }

    pub fn log(&self) -> &MediationLog {
        &self.log
    }

    pub fn into_log(self) -> MediationLog {
        self.log
    }

    /// Choose a target and DETECT signal and render the prompt. Does not
    /// touch the log; call `record_intervention` once the turn was produced.
    pub fn prepare(&self, brief: MediatorBrief<'_>) -> MediatorPlan {
        let target = self.pick_target(brief.advocates);
        let agreement = detect_implicit_agreement(brief.advocates);
        let definition = term_to_define(
            brief.turn_index,
            brief.exchanges,
            &self.log.forced_terms(),
            &self.config,
        );
        let repeating_speaker = brief.repetition.map(|hit| hit.speaker.clone());

        let budget = ResponseBudget::from_limits(&self.limits);
        let words = budget.words_for_turn(brief.turn_index);
        let max_tokens = budget.max_tokens_for_turn(brief.turn_index, &WordCountEstimator::default());

        let mut sections = vec![
            format!("RECENT DISCUSSION:\n{}", recent_discussion(brief.exchanges)),
            format!("ADVOCATE BELIEF STATES:\n{}", advocate_states(brief.advocates)),
        ];
        let scenarios = self.log.active_scenarios();
        if !scenarios.is_empty() {
            let lines: Vec<String> = scenarios
                .iter()
                .map(|s| format!("- {}: {}", s.id, s.description))
                .collect();
            sections.push(format!("ACTIVE SCENARIOS:\n{}", lines.join("\n")));
        }
        let avoid = self.log.do_not_repeat(self.config.recent_questions);
        sections.push(if avoid.is_empty() {
            "YOUR PRIOR INTERVENTIONS:\nNone yet.".to_string()
        } else {
            format!("YOUR PRIOR INTERVENTIONS (do not repeat):\n{}", avoid.join("\n"))
        });

        let mut signals = vec![format!("Trigger: {}", brief.reason)];
        if let Some(hit) = brief.repetition {
            signals.push(format!(
                "{} is repeating earlier arguments ({:.0}% overlap).",
                hit.speaker,
                hit.overlap * 100.0
            ));
        }
        if brief.stagnation > 0.0 {
            signals.push(format!("Stagnation score: {:.2}", brief.stagnation));
        }
        if let Some(signal) = &agreement {
            signals.push(format!("Unacknowledged agreement: {}", signal.describe()));
        }
        if let Some(term) = &definition {
            signals.push(format!(
                "The term '{term}' is used repeatedly without definition. Ask for an operational definition."
            ));
        }
        if let Some(name) = &target {
            signals.push(format!("Direct your QUESTION to {name}."));
        }
        sections.push(format!(
            "CONTEXT:\nPhase: {} ({})\nTurn: {}\n{}",
            brief.phase.id,
            brief.phase.phase_type,
            brief.turn_index + 1,
            signals.join("\n")
        ));
        sections.push(turn_contract(brief.phase.phase_type, words));

        MediatorPlan {
            prompt: TurnPrompt {
                system: SYSTEM_PROMPT.to_string(),
                user: sections.join("\n\n---\n\n"),
                max_tokens,
            },
            target,
            reason: brief.reason,
            agreement,
            definition,
            repeating_speaker,
        }
    }

    /// The advocate asked least recently, never-asked first, pool order on
    /// ties.
    fn pick_target(&self, advocates: &[(&str, &BeliefState)]) -> Option<String> {
        advocates
            .iter()
            .enumerate()
            .min_by_key(|(idx, (name, _))| {
                let last_asked = self
                    .log
                    .questions_asked
                    .iter()
                    .rev()
                    .find(|q| q.to.as_deref() == Some(*name))
                    .map(|q| q.turn);
                (last_asked, *idx)
            })
            .map(|(_, (name, _))| name.to_string())
    }

    /// Parse the produced turn and update the log.
    pub fn record_intervention(
        &mut self,
        turn: u32,
        text: &str,
        plan: &MediatorPlan,
    ) -> InterventionRecord {
        self.log.interventions += 1;
        let sections = parse_sections(text);
        let mut record = InterventionRecord {
            turn,
            target: plan.target.clone(),
            ..InterventionRecord::default()
        };

        let question = section(&sections, ContractSection::Question)
            .and_then(|body| body.lines().map(str::trim).find(|l| !l.is_empty()))
            .map(str::to_string)
            .or_else(|| first_question(text));
        if let Some(q) = question {
            if self.log.record_question(turn, plan.target.clone(), &q) {
                record.question = Some(q);
            } else {
                debug!(turn, "mediator repeated an earlier question");
            }
        }

        if let Some(speaker) = &plan.repeating_speaker {
            self.log.record_circular(turn, speaker);
        }
        if let Some(bridge) = section(&sections, ContractSection::Bridge) {
            self.log.record_synthesis(turn, bridge);
        }

        let lower = text.to_lowercase();
        for tool in &self.config.conceptual_tools {
            if lower.contains(tool.as_str()) && self.log.record_tool(tool) {
                record.tools.push(tool.clone());
            }
        }

        if let Some(term) = &plan.definition {
            if self.log.record_definition(turn, term) {
                record.definition = Some(term.clone());
            }
        }

        if let Some(body) = section(&sections, ContractSection::Scenarios) {
            match parse_scenarios(body) {
                Some(scenarios) => {
                    let instructions = section(&sections, ContractSection::Instructions)
                        .map(|s| s.trim().trim_matches('"').to_string())
                        .filter(|s| !s.is_empty());
                    record.scenarios = self.log.record_scenarios(turn, scenarios, instructions);
                }
                None => warn!(turn, "mediator SCENARIOS block did not parse"),
            }
        }
        record
    }
}

fn recent_discussion(exchanges: &[Exchange]) -> String {
    if exchanges.is_empty() {
        return "No exchanges yet.".into();
    }
    exchanges[exchanges.len().saturating_sub(RECENT_TURNS)..]
        .iter()
        .map(|e| {
            format!(
                "Turn {} - {}:\n  {}",
                e.turn_index + 1,
                e.speaker_id,
                truncate_chars(&e.text, EXCHANGE_PREVIEW_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn advocate_states(advocates: &[(&str, &BeliefState)]) -> String {
    if advocates.is_empty() {
        return "No advocate belief states available.".into();
    }
    let mut lines = Vec::new();
    for (name, state) in advocates {
        lines.push(format!("### {name}:"));
        if let Some(position) = &state.position {
            lines.push(format!(
                "  Position: {}",
                truncate_chars(position, POSITION_PREVIEW_CHARS)
            ));
        }
        lines.push(format!("  Certainty: {}", state.certainty));
        for (label, items) in [
            ("Conditional rules", &state.conditional_rules),
            ("Exceptions", &state.exceptions),
            ("Accepted critiques", &state.accepted_critiques),
        ] {
            if items.is_empty() {
                continue;
            }
            lines.push(format!("  {label} ({}):", items.len()));
            for item in &items[items.len().saturating_sub(ITEMS_PER_LIST)..] {
                lines.push(format!("    - {}", truncate_chars(item, ITEM_PREVIEW_CHARS)));
            }
        }
        if !state.concessions.is_empty() {
            lines.push(format!("  Recent concessions ({} total):", state.concessions.len()));
            for c in &state.concessions[state.concessions.len().saturating_sub(ITEMS_PER_LIST)..] {
                lines.push(format!("    - to {}: {}", c.from, truncate_chars(&c.point, 50)));
            }
        }
    }
    lines.join("\n")
}

fn turn_contract(phase_type: PhaseType, words: u32) -> String {
    let focus = match phase_type {
        PhaseType::Debate => "Surface testable disagreements.",
        PhaseType::Integration => "Look for overlap and possible synthesis.",
    };
    format!(
        "MEDIATOR MODE. {focus}
Your response MUST use these labelled sections:
QUESTION: one targeted question (max 30 words) to one advocate by name, referencing their \
position, certainty, a conditional rule or an exception.
DETECT: name one pattern (repetition, stagnation or implicit agreement) without taking a side \
(max 25 words).
BRIDGE: translate between two frameworks or introduce one conceptual tool (max 30 words).
SCENARIOS (optional): a JSON array of 2-3 cases, each {{\"id\": \"CASE_A\", \"description\": \
\"...\", \"params\": {{...}}}}.
INSTRUCTIONS_TO_AGENTS (only with SCENARIOS): what each advocate must do with the scenarios.
Never judge which position is correct. Total max: {words} words."
    )
}

// ── Reply parsing ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContractSection {
    Question,
    Detect,
    Bridge,
    Scenarios,
    Instructions,
}

impl ContractSection {
    const ALL: [(Self, &'static str); 5] = [
        (Self::Question, "QUESTION"),
        (Self::Detect, "DETECT"),
        (Self::Bridge, "BRIDGE"),
        (Self::Scenarios, "SCENARIOS"),
        (Self::Instructions, "INSTRUCTIONS_TO_AGENTS"),
    ];
}

/// Header lines look like `QUESTION: ...`, `2. **DETECT**: ...` or
/// `SCENARIOS (optional):`.
fn header(line: &str) -> Option<(ContractSection, &str)> {
    let stripped = line
        .trim_start_matches(|c: char| {
            c.is_ascii_digit() || c.is_whitespace() || matches!(c, '.' | ')' | '#' | '*')
        });
    for (section, label) in ContractSection::ALL {
        let Some(rest) = stripped.strip_prefix(label) else {
            continue;
        };
        let rest = rest.trim_start_matches('*').trim_start();
        let rest = match rest.strip_prefix('(') {
            Some(inner) => inner.split_once(')').map_or(inner, |(_, after)| after).trim_start(),
            None => rest,
        };
        if let Some(body) = rest.strip_prefix(':') {
            return Some((section, body.trim_start_matches('*').trim()));
        }
    }
    None
}

fn parse_sections(text: &str) -> Vec<(ContractSection, String)> {
    let mut out: Vec<(ContractSection, String)> = Vec::new();
    for line in text.lines() {
        if let Some((section, first)) = header(line) {
            out.push((section, first.to_string()));
        } else if let Some((_, body)) = out.last_mut() {
            body.push('\n');
            body.push_str(line);
        }
    }
    out
}

fn section(sections: &[(ContractSection, String)], wanted: ContractSection) -> Option<&str> {
    sections
        .iter()
        .find(|(s, body)| *s == wanted && !body.trim().is_empty())
        .map(|(_, body)| body.trim())
}

fn first_question(text: &str) -> Option<String> {
    let end = text.find('?')?;
    let start = text[..end]
        .rfind(['.', '!', '\n'])
        .map_or(0, |idx| idx + 1);
    let question = text[start..=end].trim();
    (!question.is_empty()).then(|| question.to_string())
}

/// The first balanced JSON array in `body`.
fn parse_scenarios(body: &str) -> Option<Vec<Scenario>> {
    let start = body.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in body[start..].char_indices() {
        if in_string {
            match c {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    let raw = &body[start..=start + offset];
                    return serde_json::from_str(raw).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states() -> (BeliefState, BeliefState) {
        let mut ada = BeliefState::default();
        ada.position = Some("Build the scheduler first".into());
        ada.conditional_rules.push("only if clinics opt in".into());
        let mut bo = BeliefState::default();
        bo.exceptions.push("emergency referrals".into());
        bo.conditional_rules.push("Only if clinics opt in voluntarily".into());
        (ada, bo)
    }

    fn exchanges() -> Vec<Exchange> {
        (0..4)
            .map(|i| Exchange::new("debate", i, if i % 2 == 0 { "Ada" } else { "Bo" }, format!("point {i}")))
            .collect()
    }

    const REPLY: &str = "QUESTION: Ada, what evidence would lower your certainty?
DETECT: You both added the opt-in condition without saying so.
BRIDGE: Consider a threshold: at what adoption level does opt-in stop mattering?
SCENARIOS:
[
  {\"id\": \"CASE_A\", \"description\": \"Two clinics, 500 patients\", \"params\": {\"clinics\": 2}},
  {\"id\": \"CASE_B\", \"description\": \"Forty clinics [rural]\", \"params\": {\"clinics\": 40}}
]
INSTRUCTIONS_TO_AGENTS: \"Apply your position to each case.\"";

    #[test]
    fn test_prepare_targets_and_signals() {
        let (ada, bo) = states();
        let advocates = [("Ada", &ada), ("Bo", &bo)];
        let log = exchanges();
        let phase = Phase::new("debate", "pick a first build", "a choice", 12);
        let mediator = Mediator::new(MediatorConfig::default(), MemoryLimits::default());
        let plan = mediator.prepare(MediatorBrief {
            phase: &phase,
            turn_index: 3,
            exchanges: &log,
            advocates: &advocates,
            reason: TriggerReason::Cadence,
            repetition: None,
            stagnation: 0.0,
        });
        assert_eq!(plan.target.as_deref(), Some("Ada"));
        assert!(plan.agreement.is_some());
        assert!(plan.prompt.user.contains("Direct your QUESTION to Ada."));
        assert!(plan.prompt.user.contains("Unacknowledged agreement"));
        assert!(plan.prompt.user.contains("INSTRUCTIONS_TO_AGENTS"));
        assert!(plan.prompt.max_tokens > 0);
    }

    #[test]
    fn test_record_intervention_parses_contract() {
        let (ada, bo) = states();
        let advocates = [("Ada", &ada), ("Bo", &bo)];
        let log = exchanges();
        let phase = Phase::new("debate", "g", "o", 12);
        let mut mediator = Mediator::new(MediatorConfig::default(), MemoryLimits::default());
        let brief = MediatorBrief {
            phase: &phase,
            turn_index: 3,
            exchanges: &log,
            advocates: &advocates,
            reason: TriggerReason::Cadence,
            repetition: None,
            stagnation: 0.0,
        };
        let plan = mediator.prepare(brief);
        let record = mediator.record_intervention(3, REPLY, &plan);
        assert_eq!(
            record.question.as_deref(),
            Some("Ada, what evidence would lower your certainty?")
        );
        assert_eq!(record.tools, vec!["threshold".to_string()]);
        assert_eq!(record.scenarios, 2);
        assert_eq!(
            mediator.log().scenarios_presented[0].instructions,
            "Apply your position to each case."
        );
        assert_eq!(mediator.log().synthesis_points.len(), 1);

        // The next plan rotates to the advocate not yet asked, and the old
        // question shows up as "do not repeat".
        let next = mediator.prepare(MediatorBrief {
            turn_index: 7,
            ..brief
        });
        assert_eq!(next.target.as_deref(), Some("Bo"));
        assert!(next.prompt.user.contains("Already asked Ada (turn 3)"));
        assert!(next.prompt.user.contains("ACTIVE SCENARIOS"));

        let again = mediator.record_intervention(7, REPLY, &next);
        assert!(again.question.is_none());
        assert!(again.tools.is_empty());
        assert_eq!(again.scenarios, 0);
        assert_eq!(mediator.log().interventions, 2);
    }

    #[test]
    fn test_header_variants() {
        assert_eq!(
            header("2. **DETECT**: circular"),
            Some((ContractSection::Detect, "circular"))
        );
        assert_eq!(
            header("SCENARIOS (optional):"),
            Some((ContractSection::Scenarios, ""))
        );
        assert_eq!(header("Questions remain"), None);
    }

    #[test]
    fn test_unlabelled_reply_falls_back_to_first_question() {
        let mut mediator = Mediator::new(MediatorConfig::default(), MemoryLimits::default());
        let plan = MediatorPlan {
            prompt: TurnPrompt {
                system: String::new(),
                user: String::new(),
                max_tokens: 10,
            },
            target: None,
            reason: TriggerReason::Stagnation,
            agreement: None,
            definition: Some("fairness".into()),
            repeating_speaker: Some("Bo".into()),
        };
        let record = mediator.record_intervention(
            5,
            "We keep circling. Bo, how do you define fairness here? Let's test it.",
            &plan,
        );
        assert_eq!(record.question.as_deref(), Some("Bo, how do you define fairness here?"));
        assert_eq!(record.definition.as_deref(), Some("fairness"));
        assert_eq!(mediator.log().circular_arguments_detected.len(), 1);
    }
}
