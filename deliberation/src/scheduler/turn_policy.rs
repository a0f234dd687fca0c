//! Tie-break policy for choosing the next speaker.
//!
//! 1. Whoever the last exchange addressed by name.
//! 2. If the last exchange pushed back on the one before it, the speaker
//!    being disagreed with may answer, until the pair has run for
//!    `max_pair_run` exchanges.
//! 3. Otherwise the participant seen least in the last `balance_window`
//!    exchanges, least recently first, pool order on ties.
//!
//! Nobody speaks twice in a row unless the pool has a single member.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::errors::{DeliberationError, Result};
use crate::persona::PersonaProfile;
use crate::transcript::Exchange;

#[derive(Debug, Clone)]
pub struct TurnPolicy {
    balance_window: usize,
    max_pair_run: usize,
    disagreement_markers: Vec<String>,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self::new(&SchedulerConfig::default())
    }
}

/// Two personas alternating at the tail of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRun {
    pub latest: String,
    pub other: String,
    pub length: usize,
}

impl PairRun {
    fn contains(&self, name: &str) -> bool {
        self.latest == name || self.other == name
    }
}

impl TurnPolicy {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            balance_window: config.balance_window,
            max_pair_run: config.max_pair_run,
            disagreement_markers: config
                .disagreement_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }

    pub fn disagrees(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.disagreement_markers
            .iter()
            .any(|m| lower.contains(m.as_str()))
    }

    /// Pool member named in the last exchange, earliest mention first.
    pub fn addressed<'p>(
        &self,
        pool: &'p [Arc<PersonaProfile>],
        history: &[Exchange],
    ) -> Option<&'p Arc<PersonaProfile>> {
        let last = history.last()?;
        let lower = last.text.to_lowercase();
        pool.iter()
            .filter(|p| p.name != last.speaker_id)
            .filter_map(|p| mention_at(&lower, &p.name.to_lowercase()).map(|pos| (pos, p)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, p)| p)
    }

    /// Alternating persona pair at the tail of the log. A mediator turn
    /// breaks the run.
    pub fn pair_run(&self, history: &[Exchange]) -> Option<PairRun> {
        let mut tail = history.iter().rev();
        let last = tail.next().filter(|e| !e.is_mediator())?;
        let prev = tail
            .next()
            .filter(|e| !e.is_mediator() && e.speaker_id != last.speaker_id)?;
        let mut length = 2;
        let mut expected = &last.speaker_id;
        for exchange in history.iter().rev().skip(2) {
            if exchange.is_mediator() || exchange.speaker_id != *expected {
                break;
            }
            length += 1;
            expected = if expected == &last.speaker_id {
                &prev.speaker_id
            } else {
                &last.speaker_id
            };
        }
        Some(PairRun {
            latest: last.speaker_id.clone(),
            other: prev.speaker_id.clone(),
            length,
        })
    }

    /// Deterministic choice; `None` only for an empty pool.
    pub fn choose(&self, pool: &[Arc<PersonaProfile>], history: &[Exchange]) -> Option<String> {
        if pool.is_empty() {
            return None;
        }
        let last_speaker = history.last().map(|e| e.speaker_id.as_str());
        let pair = self.pair_run(history);
        let forced_out = pair
            .as_ref()
            .filter(|run| run.length >= self.max_pair_run)
            .filter(|run| pool.iter().any(|p| !run.contains(&p.name)));
        let eligible = |name: &str| {
            Some(name) != last_speaker && !forced_out.is_some_and(|run| run.contains(name))
        };

        if let Some(p) = self.addressed(pool, history).filter(|p| eligible(&p.name)) {
            return Some(p.name.clone());
        }

        if forced_out.is_none() {
            if let Some(last) = history.last().filter(|e| !e.is_mediator() && self.disagrees(&e.text)) {
                let challenged = history
                    .iter()
                    .rev()
                    .skip(1)
                    .find(|e| !e.is_mediator())
                    .filter(|e| e.speaker_id != last.speaker_id)
                    .and_then(|e| pool.iter().find(|p| p.name == e.speaker_id));
                if let Some(p) = challenged {
                    return Some(p.name.clone());
                }
            }
        }

        let mut candidates: Vec<(usize, &Arc<PersonaProfile>)> = pool
            .iter()
            .enumerate()
            .filter(|(_, p)| eligible(&p.name))
            .collect();
        if candidates.is_empty() {
            candidates = pool
                .iter()
                .enumerate()
                .filter(|(_, p)| Some(p.name.as_str()) != last_speaker)
                .collect();
        }
        if candidates.is_empty() {
            return pool.first().map(|p| p.name.clone());
        }
        let window = &history[history.len().saturating_sub(self.balance_window)..];
        candidates
            .into_iter()
            .min_by_key(|(idx, p)| {
                let seen = window.iter().filter(|e| e.speaker_id == p.name).count();
                let last_spoke = history.iter().rposition(|e| e.speaker_id == p.name);
                (seen, last_spoke, *idx)
            })
            .map(|(_, p)| p.name.clone())
    }

    /// Validate a proposed speaker. Unknown names are a `DecisionError`;
    /// a known name that breaks the policy is replaced by the policy's own
    /// choice.
    pub fn review(
        &self,
        candidate: &str,
        pool: &[Arc<PersonaProfile>],
        history: &[Exchange],
    ) -> Result<String> {
        let wanted = candidate.trim();
        let found = pool
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DeliberationError::decision(format!("unknown speaker '{wanted}'")))?;
        let policy_choice = self.choose(pool, history);

        let last_speaker = history.last().map(|e| e.speaker_id.as_str());
        if let Some(addressed) = self.addressed(pool, history) {
            if addressed.name != found.name && policy_choice.as_deref() == Some(addressed.name.as_str()) {
                return Ok(addressed.name.clone());
            }
        }
        let repeats = pool.len() > 1 && Some(found.name.as_str()) == last_speaker;
        let over_run = self
            .pair_run(history)
            .is_some_and(|run| run.length >= self.max_pair_run && run.contains(&found.name))
            && pool.len() > 2;
        if repeats || over_run {
            return policy_choice
                .ok_or_else(|| DeliberationError::decision("no eligible speaker"));
        }
        Ok(found.name.clone())
    }
}

/// Fallback: `pool[turn_index mod len]`, stepping past the last speaker.
pub fn round_robin(
    pool: &[Arc<PersonaProfile>],
    turn_index: u32,
    last_speaker: Option<&str>,
) -> Option<String> {
    if pool.is_empty() {
        return None;
    }
    let mut idx = turn_index as usize % pool.len();
    if pool.len() > 1 && Some(pool[idx].name.as_str()) == last_speaker {
        idx = (idx + 1) % pool.len();
    }
    Some(pool[idx].name.clone())
}

/// Byte offset of `name` in `text` as a whole word.
fn mention_at(text: &str, name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    text.match_indices(name).map(|(pos, _)| pos).find(|&pos| {
        let before = text[..pos].chars().next_back();
        let after = text[pos + name.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(names: &[&str]) -> Vec<Arc<PersonaProfile>> {
        names
            .iter()
            .map(|n| Arc::new(PersonaProfile::new(*n, "role")))
            .collect()
    }

    fn history(turns: &[(&str, &str)]) -> Vec<Exchange> {
        turns
            .iter()
            .enumerate()
            .map(|(i, (s, t))| Exchange::new("p", i as u32, *s, *t))
            .collect()
    }

    #[test]
    fn test_addressed_participant_first() {
        let pool = pool(&["Ada", "Bo", "Cy"]);
        let log = history(&[("Ada", "Cy, what do you think about cost?")]);
        let policy = TurnPolicy::default();
        assert_eq!(policy.choose(&pool, &log).as_deref(), Some("Cy"));
    }

    #[test]
    fn test_mention_must_be_whole_word() {
        assert_eq!(mention_at("ask bob", "bo"), None);
        assert_eq!(mention_at("ask bo, please", "bo"), Some(4));
    }

    #[test]
    fn test_load_balancing_prefers_silent() {
        let pool = pool(&["Ada", "Bo", "Cy"]);
        let log = history(&[("Ada", "one"), ("Bo", "two"), ("Ada", "three")]);
        let policy = TurnPolicy::default();
        assert_eq!(policy.choose(&pool, &log).as_deref(), Some("Cy"));
    }

    #[test]
    fn test_disagreement_pair_then_forced_rotation() {
        let pool = pool(&["Ada", "Bo", "Cy"]);
        let policy = TurnPolicy::default();

        let log = history(&[("Ada", "Scheduling first."), ("Bo", "I disagree, payments first.")]);
        assert_eq!(policy.choose(&pool, &log).as_deref(), Some("Ada"));

        let log = history(&[
            ("Ada", "Scheduling first."),
            ("Bo", "I disagree, payments first."),
            ("Ada", "I disagree, scheduling unlocks payments."),
        ]);
        assert_eq!(policy.pair_run(&log).map(|r| r.length), Some(3));
        assert_eq!(policy.choose(&pool, &log).as_deref(), Some("Cy"));
    }

    #[test]
    fn test_never_same_speaker_twice() {
        let pool = pool(&["Ada", "Bo"]);
        let log = history(&[("Ada", "one"), ("Bo", "two"), ("Ada", "three")]);
        let policy = TurnPolicy::default();
        assert_eq!(policy.choose(&pool, &log).as_deref(), Some("Bo"));
        let solo = vec![Arc::new(PersonaProfile::new("Ada", "role"))];
        assert_eq!(policy.choose(&solo, &log).as_deref(), Some("Ada"));
    }

    #[test]
    fn test_review_rejects_unknown_and_fixes_repeats() {
        let pool = pool(&["Ada", "Bo", "Cy"]);
        let log = history(&[("Ada", "one"), ("Bo", "two")]);
        let policy = TurnPolicy::default();
        assert!(matches!(
            policy.review("Zed", &pool, &log),
            Err(DeliberationError::Decision(_))
        ));
        assert_eq!(policy.review("bo", &pool, &log).unwrap(), "Cy");
        assert_eq!(policy.review("Ada", &pool, &log).unwrap(), "Ada");
    }

    #[test]
    fn test_round_robin_skips_last() {
        let pool = pool(&["Ada", "Bo", "Cy"]);
        assert_eq!(round_robin(&pool, 4, None).as_deref(), Some("Bo"));
        assert_eq!(round_robin(&pool, 4, Some("Bo")).as_deref(), Some("Cy"));
        assert_eq!(round_robin(&[], 4, None), None);
    }
}
