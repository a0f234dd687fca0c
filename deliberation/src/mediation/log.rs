//! The mediator's record of its own interventions.
//!
//! Only consulted to avoid asking the same question or introducing the same
//! tool twice. It never holds conversation content beyond short previews.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::text::truncate_chars;

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskedQuestion {
    pub turn: u32,
    pub to: Option<String>,
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircularArgument {
    pub turn: u32,
    pub speaker: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisPoint {
    pub turn: u32,
    pub bridge: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcedDefinition {
    pub turn: u32,
    pub term: String,
}

/// A small concrete case agents must apply their position to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentedScenarios {
    pub turn: u32,
    pub scenarios: Vec<Scenario>,
    pub instructions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediationLog {
    pub interventions: u32,
    pub questions_asked: Vec<AskedQuestion>,
    pub circular_arguments_detected: Vec<CircularArgument>,
    pub synthesis_points: Vec<SynthesisPoint>,
    pub conceptual_tools_introduced: Vec<String>,
    pub definitions_forced: Vec<ForcedDefinition>,
    pub scenarios_presented: Vec<PresentedScenarios>,
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl MediationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.interventions == 0
    }

    pub fn has_asked(&self, question: &str) -> bool {
        let wanted = normalize(question);
        self.questions_asked
            .iter()
            .any(|q| normalize(&q.question) == wanted)
    }

    /// Records the question unless an equivalent one was already asked.
    pub fn record_question(&mut self, turn: u32, to: Option<String>, question: &str) -> bool {
        if question.trim().is_empty() || self.has_asked(question) {
            return false;
        }
        self.questions_asked.push(AskedQuestion {
            turn,
            to,
            question: truncate_chars(question.trim(), PREVIEW_CHARS),
        });
        true
    }

    pub fn record_circular(&mut self, turn: u32, speaker: &str) {
        let already = self
            .circular_arguments_detected
            .iter()
            .any(|c| c.turn == turn && c.speaker == speaker);
        if !already {
            self.circular_arguments_detected.push(CircularArgument {
                turn,
                speaker: speaker.to_string(),
            });
        }
    }

    pub fn record_synthesis(&mut self, turn: u32, bridge: &str) {
        if bridge.trim().is_empty() {
            return;
        }
        self.synthesis_points.push(SynthesisPoint {
            turn,
            bridge: truncate_chars(bridge.trim(), PREVIEW_CHARS),
        });
    }

    pub fn has_introduced(&self, tool: &str) -> bool {
        self.conceptual_tools_introduced
            .iter()
            .any(|t| t.eq_ignore_ascii_case(tool))
    }

    pub fn record_tool(&mut self, tool: &str) -> bool {
        if self.has_introduced(tool) {
            return false;
        }
        self.conceptual_tools_introduced.push(tool.to_lowercase());
        true
    }

    pub fn forced_terms(&self) -> Vec<String> {
        self.definitions_forced.iter().map(|d| d.term.clone()).collect()
    }

    pub fn record_definition(&mut self, turn: u32, term: &str) -> bool {
        if self.definitions_forced.iter().any(|d| d.term == term) {
            return false;
        }
        self.definitions_forced.push(ForcedDefinition {
            turn,
            term: term.to_string(),
        });
        true
    }

    /// Scenario ids already used are dropped; returns how many were kept.
    pub fn record_scenarios(
        &mut self,
        turn: u32,
        scenarios: Vec<Scenario>,
        instructions: Option<String>,
    ) -> usize {
        let fresh: Vec<Scenario> = scenarios
            .into_iter()
            .filter(|s| {
                !self
                    .scenarios_presented
                    .iter()
                    .flat_map(|p| &p.scenarios)
                    .any(|seen| seen.id == s.id && seen.description == s.description)
            })
            .collect();
        let kept = fresh.len();
        if kept > 0 {
            self.scenarios_presented.push(PresentedScenarios {
                turn,
                scenarios: fresh,
                instructions: instructions
                    .unwrap_or_else(|| "Apply your position to each scenario.".into()),
            });
        }
        kept
    }

    /// Scenarios from the most recent presentation.
    pub fn active_scenarios(&self) -> &[Scenario] {
        self.scenarios_presented
            .last()
            .map(|p| p.scenarios.as_slice())
            .unwrap_or(&[])
    }

    /// "Do not repeat" lines for the next mediator prompt.
    pub fn do_not_repeat(&self, recent_questions: usize) -> Vec<String> {
        let mut lines: Vec<String> = self
            .questions_asked
            .iter()
            .rev()
            .take(recent_questions)
            .rev()
            .map(|q| match &q.to {
                Some(to) => format!("Already asked {to} (turn {}): {}", q.turn, q.question),
                None => format!("Already asked (turn {}): {}", q.turn, q.question),
            })
            .collect();
        if !self.conceptual_tools_introduced.is_empty() {
            lines.push(format!(
                "Tools already introduced: {}",
                self.conceptual_tools_introduced.join(", ")
            ));
        }
        if !self.definitions_forced.is_empty() {
            lines.push(format!(
                "Definitions already requested: {}",
                self.forced_terms().join(", ")
            ));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_question_dedup_ignores_case_and_punctuation() {
        let mut log = MediationLog::new();
        assert!(log.record_question(3, Some("Ada".into()), "Ada, what would change your mind?"));
        assert!(!log.record_question(7, Some("Ada".into()), "ada what would change your MIND"));
        assert_eq!(log.questions_asked.len(), 1);
    }

    #[test]
    fn test_tools_and_definitions_once() {
        let mut log = MediationLog::new();
        assert!(log.record_tool("Veil of Ignorance"));
        assert!(!log.record_tool("veil of ignorance"));
        assert!(log.record_definition(4, "fairness"));
        assert!(!log.record_definition(8, "fairness"));
        let lines = log.do_not_repeat(3);
        assert_eq!(
            lines,
            vec![
                "Tools already introduced: veil of ignorance".to_string(),
                "Definitions already requested: fairness".to_string(),
            ]
        );
    }

    #[test]
    fn test_scenarios_deduplicated() {
        let mut log = MediationLog::new();
        let case = Scenario {
            id: "CASE_A".into(),
            description: "Budget of 10k".into(),
            params: json!({"budget": 10000}),
        };
        assert_eq!(log.record_scenarios(3, vec![case.clone()], None), 1);
        assert_eq!(log.record_scenarios(7, vec![case], None), 0);
        assert_eq!(log.scenarios_presented.len(), 1);
        assert_eq!(log.active_scenarios()[0].id, "CASE_A");
    }

    #[test]
    fn test_do_not_repeat_keeps_latest_questions() {
        let mut log = MediationLog::new();
        for (turn, q) in [(3, "first?"), (7, "second?"), (11, "third?")] {
            log.record_question(turn, None, q);
        }
        let lines = log.do_not_repeat(2);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("second?"));
        assert!(lines[1].contains("third?"));
    }
}
