//! Memory compressor: renders one agent's bounded context bundle.
//!
//! ```text
//! phase framing ─────────────┐
//! whiteboard (earlier phases)┤
//! last 1–2 exchanges ────────┤
//! own summary (≤2 bullets) ──┼──► ContextBundle ──► TurnPrompt
//! own belief state ──────────┤
//! 2–3 idea memory cards ─────┤
//! optional gap nudge ────────┘
//! ```
//!
//! Every input is either a bounded suffix slice or truncated item-by-item,
//! and each rendered section is finally capped at `section_chars`, so the
//! bundle size is independent of conversation length.

use crate::belief::AgentMemory;
use crate::config::MemoryLimits;
use crate::ideas::IdeaRecord;
use crate::memory::budget::{ResponseBudget, WordCountEstimator};
use crate::persona::{PersonaProfile, TurnPrompt};
use crate::phase::Phase;
use crate::text::truncate_chars;
use crate::transcript::Exchange;

/// Everything the compressor may read for one turn.
#[derive(Debug, Clone, Copy)]
pub struct CompressorInput<'a> {
    pub phase: &'a Phase,
    pub turn_index: u32,
    pub persona: &'a PersonaProfile,
    /// Any suffix of the phase log; only the last few entries are used.
    pub recent: &'a [Exchange],
    pub memory: Option<&'a AgentMemory>,
    pub focus: Option<&'a str>,
    pub cards: &'a [IdeaRecord],
    pub rejected_titles: &'a [String],
    pub nudge: Option<&'a str>,
    /// Summaries of earlier phases, oldest first.
    pub whiteboard: &'a [String],
}

/// Rendered, size-bounded context for one generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextBundle {
    pub framing: String,
    pub whiteboard: Option<String>,
    pub recent_exchanges: Option<String>,
    pub summary: Option<String>,
    pub belief: Option<String>,
    pub memory_cards: Option<String>,
    pub gap_nudge: Option<String>,
    pub word_budget: u32,
    pub max_tokens: u32,
}

impl ContextBundle {
    fn sections(&self) -> [(&'static str, Option<&String>); 6] {
        [
            ("Earlier phases", self.whiteboard.as_ref()),
            ("Recent discussion", self.recent_exchanges.as_ref()),
            ("Your notes", self.summary.as_ref()),
            ("Your current stance", self.belief.as_ref()),
            ("Ideas in play", self.memory_cards.as_ref()),
            ("Facilitator note", self.gap_nudge.as_ref()),
        ]
    }

    /// Characters in every section except the framing.
    pub fn variable_char_len(&self) -> usize {
        self.sections()
            .iter()
            .filter_map(|(_, s)| *s)
            .map(|s| s.chars().count())
            .sum()
    }

    pub fn char_len(&self) -> usize {
        self.framing.chars().count() + self.variable_char_len()
    }

    /// Prompt for a persona's turn.
    pub fn to_prompt(&self, persona: &PersonaProfile) -> TurnPrompt {
        let mut user = self.framing.clone();
        for (title, body) in self.sections() {
            if let Some(body) = body {
                user.push_str(&format!("\n\n## {title}\n{body}"));
            }
        }
        user.push_str(&format!(
            "\n\nContinue the discussion as {}. Respond in at most {} words.",
            persona.name, self.word_budget
        ));
        TurnPrompt {
            system: persona.system_prompt(),
            user,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryCompressor {
    limits: MemoryLimits,
    budget: ResponseBudget,
    estimator: WordCountEstimator,
}

impl MemoryCompressor {
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            budget: ResponseBudget::from_limits(&limits),
            limits,
            estimator: WordCountEstimator::default(),
        }
    }

    pub fn limits(&self) -> &MemoryLimits {
        &self.limits
    }

    pub fn budget(&self) -> &ResponseBudget {
        &self.budget
    }

    pub fn build(&self, input: CompressorInput<'_>) -> ContextBundle {
        let cap = self.limits.section_chars;
        let word_budget = self.budget.words_for_turn(input.turn_index);
        ContextBundle {
            framing: framing(input.phase, input.turn_index, word_budget),
            whiteboard: self.whiteboard(input.whiteboard).map(|s| truncate_chars(&s, cap)),
            recent_exchanges: self.recent(input.recent).map(|s| truncate_chars(&s, cap)),
            summary: input
                .memory
                .and_then(|m| m.summary.render(&self.limits))
                .map(|s| truncate_chars(&s, cap)),
            belief: input
                .memory
                .and_then(|m| m.belief_state())
                .map(|b| truncate_chars(&b.render(&self.limits), cap)),
            memory_cards: self
                .cards(input.cards, input.focus, input.rejected_titles)
                .map(|s| truncate_chars(&s, cap)),
            gap_nudge: input
                .nudge
                .map(|n| truncate_chars(n, self.limits.nudge_chars)),
            word_budget,
            max_tokens: self
                .budget
                .max_tokens_for_turn(input.turn_index, &self.estimator),
        }
    }

    fn whiteboard(&self, items: &[String]) -> Option<String> {
        let start = items.len().saturating_sub(self.limits.whiteboard_items);
        let lines: Vec<String> = items[start..]
            .iter()
            .map(|s| format!("- {}", truncate_chars(s, self.limits.whiteboard_chars)))
            .collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    }

    fn recent(&self, exchanges: &[Exchange]) -> Option<String> {
        let start = exchanges.len().saturating_sub(self.limits.recent_exchanges);
        let lines: Vec<String> = exchanges[start..]
            .iter()
            .map(|e| {
                format!(
                    "{}: {}",
                    e.speaker_id,
                    truncate_chars(&e.text, self.limits.exchange_chars)
                )
            })
            .collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    }

    fn cards(&self, cards: &[IdeaRecord], focus: Option<&str>, rejected: &[String]) -> Option<String> {
        let mut blocks: Vec<String> = cards
            .iter()
            .filter(|c| c.is_in_play())
            .take(self.limits.memory_cards)
            .map(|c| {
                let marker = if focus == Some(c.title.as_str()) {
                    " (current focus)"
                } else {
                    ""
                };
                let mut block = format!(
                    "### {}{}\n{}",
                    truncate_chars(&c.title, self.limits.card_title_chars),
                    marker,
                    truncate_chars(&c.overview, self.limits.card_overview_chars)
                );
                if !c.example.is_empty() {
                    block.push_str(&format!(
                        "\nExample: {}",
                        truncate_chars(&c.example, self.limits.card_example_chars)
                    ));
                }
                block
            })
            .collect();
        let start = rejected.len().saturating_sub(self.limits.rejected_titles);
        if !rejected[start..].is_empty() {
            let titles: Vec<String> = rejected[start..]
                .iter()
                .map(|t| truncate_chars(t, self.limits.card_title_chars))
                .collect();
            blocks.push(format!("Already rejected: {}", titles.join(", ")));
        }
        (!blocks.is_empty()).then(|| blocks.join("\n\n"))
    }
}

impl Default for MemoryCompressor {
    fn default() -> Self {
        Self::new(MemoryLimits::default())
    }
}

fn framing(phase: &Phase, turn_index: u32, word_budget: u32) -> String {
    let mut out = format!(
        "Phase: {} ({})\nGoal: {}\nDesired outcome: {}",
        phase.id, phase.phase_type, phase.goal, phase.desired_outcome
    );
    if let Some((n, name)) = phase.stage_for_turn(turn_index) {
        out.push_str(&format!("\nStage {n} of {}: {name}", phase.stages.len()));
    }
    out.push_str(&format!(
        "\nTurn {} of {}. Budget: {word_budget} words.",
        turn_index + 1,
        phase.max_turns
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::{BeliefUpdate, SummaryUpdate};
    use crate::ideas::{IdeaLedger, IdeaStatus};

    fn persona() -> PersonaProfile {
        PersonaProfile::new("Ada", "a pragmatic engineer")
    }

    fn phase() -> Phase {
        Phase::new("ideation", "Generate ideas", "Three ideas", 50)
    }

    fn grown_memory(turns: u32) -> AgentMemory {
        let mut memory = AgentMemory::new();
        for t in 0..turns {
            memory.summary.apply(SummaryUpdate {
                new_facts: vec![format!("fact number {t} {}", "f".repeat(80))],
                key_concerns: vec![format!("concern {t}")],
                ..Default::default()
            });
            if let Some(belief) = memory.belief_mut() {
                belief.apply(
                    BeliefUpdate {
                        position: Some(format!("position at {t} {}", "p".repeat(400))),
                        new_conditional_rules: vec![format!("rule {t} {}", "r".repeat(100))],
                        new_exceptions: vec![format!("exception {t}")],
                        ..Default::default()
                    },
                    t,
                );
            }
        }
        memory
    }

    #[test]
    fn test_empty_bundle_has_framing_only() {
        let compressor = MemoryCompressor::default();
        let p = phase();
        let bundle = compressor.build(CompressorInput {
            phase: &p,
            turn_index: 0,
            persona: &persona(),
            recent: &[],
            memory: None,
            focus: None,
            cards: &[],
            rejected_titles: &[],
            nudge: None,
            whiteboard: &[],
        });
        assert_eq!(bundle.variable_char_len(), 0);
        assert_eq!(bundle.word_budget, 300);
        assert!(bundle.framing.contains("Turn 1 of 50"));
        let prompt = bundle.to_prompt(&persona());
        assert!(prompt.user.ends_with("Respond in at most 300 words."));
        assert!(prompt.system.contains("Ada"));
    }

    #[test]
    fn test_bundle_is_bounded_as_history_grows() {
        let compressor = MemoryCompressor::default();
        let p = phase();
        let ledger = IdeaLedger::default();
        let mut log = Vec::new();
        let mut sizes = Vec::new();
        let whiteboard: Vec<String> = (0..10).map(|i| format!("summary {i} {}", "w".repeat(500))).collect();
        for turn in 0..50u32 {
            log.push(Exchange::new("ideation", turn, "Bo", "x".repeat(1000 + turn as usize * 50)));
            let letter = (b'a' + (turn % 26) as u8) as char;
            let title = format!("{}{}", letter.to_string().repeat(6), turn / 26);
            ledger.register_or_refine(&title, &"o".repeat(900), "e", turn, "ideation");
            if turn % 3 == 0 {
                ledger.reject(&title, "no", turn, "ideation");
            }
            let memory = grown_memory(turn + 1);
            let cards = ledger.memory_cards(3);
            let rejected = ledger.recently_rejected(2);
            let focus = ledger.current_focus();
            let bundle = compressor.build(CompressorInput {
                phase: &p,
                turn_index: turn,
                persona: &persona(),
                recent: &log,
                memory: Some(&memory),
                focus: focus.as_deref(),
                cards: &cards,
                rejected_titles: &rejected,
                nudge: Some(&"n".repeat(500)),
                whiteboard: &whiteboard,
            });
            sizes.push(bundle.variable_char_len());
        }
        let bound = compressor.limits().max_variable_chars();
        assert!(sizes.iter().all(|&s| s <= bound));
        assert!(sizes[49] <= sizes[10] + 50);
        assert!(sizes[49] > 0);
    }

    #[test]
    fn test_cards_mark_focus_and_list_rejections() {
        let compressor = MemoryCompressor::default();
        let ledger = IdeaLedger::default();
        ledger.register_or_refine("HealthBridge", "Clinic scheduling.", "A nurse books.", 1, "p");
        ledger.register_or_refine("Tool Library", "Lend tools.", "", 2, "p");
        ledger.reject("Tool Library", "too risky", 3, "p");
        let cards = ledger.memory_cards(3);
        assert!(cards.iter().all(|c| c.status == IdeaStatus::InPlay));
        let rendered = compressor
            .cards(&cards, ledger.current_focus().as_deref(), &ledger.recently_rejected(2))
            .unwrap();
        assert!(rendered.contains("### HealthBridge (current focus)"));
        assert!(rendered.contains("Example: A nurse books."));
        assert!(rendered.contains("Already rejected: Tool Library"));
    }

    #[test]
    fn test_recent_keeps_last_two_truncated() {
        let compressor = MemoryCompressor::default();
        let log = vec![
            Exchange::new("p", 0, "Ada", "first"),
            Exchange::new("p", 1, "Bo", "second"),
            Exchange::new("p", 2, "Cy", "y".repeat(500)),
        ];
        let out = compressor.recent(&log).unwrap();
        assert!(!out.contains("first"));
        assert!(out.starts_with("Bo: second"));
        let last = out.lines().last().unwrap();
        assert_eq!(last.chars().count(), "Cy: ".len() + 200);
    }

    #[test]
    fn test_stage_in_framing() {
        let p = Phase::new("p", "g", "o", 4).with_stages(["Diverge", "Converge"]);
        assert!(framing(&p, 3, 150).contains("Stage 2 of 2: Converge"));
    }
}
