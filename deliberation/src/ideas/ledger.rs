//! Idea ledger: deduplicated, status-tracked registry of proposed concepts.
//!
//! ```text
//!                 register_or_refine(title ≈ existing)
//!                      ┌──────────┐
//!                      ▼          │
//!  detect ──► [ in_play ] ────────┘
//!                 │
//!                 │ reject(title)
//!                 ▼
//!            [ rejected ]   (terminal)
//! ```
//!
//! Background analyses mutate the ledger concurrently. Each record sits
//! behind its own mutex so a refinement and a rejection of the same idea
//! serialize; the record list itself only takes a write lock to insert.
//! Lock order: focus, then the record list, then individual records.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::similarity::{SequenceRatio, TitleSimilarity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeaStatus {
    InPlay,
    Rejected,
}

impl std::fmt::Display for IdeaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InPlay => write!(f, "in_play"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refinement {
    pub turn: u32,
    pub phase: String,
    pub overview: String,
    pub example: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaRecord {
    pub title: String,
    pub overview: String,
    pub example: String,
    pub status: IdeaStatus,
    pub rejection_reason: Option<String>,
    pub first_turn: u32,
    pub first_phase: String,
    pub last_updated_turn: u32,
    pub refinements: Vec<Refinement>,
}

impl IdeaRecord {
    pub fn is_in_play(&self) -> bool {
        self.status == IdeaStatus::InPlay
    }
}

/// What `register_or_refine` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerChange {
    Created,
    Refined,
    /// Matched an existing record but the candidate was less detailed, or
    /// the record is rejected.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub record: IdeaRecord,
    pub change: LedgerChange,
}

type Slot = Arc<Mutex<IdeaRecord>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct IdeaLedger {
    records: RwLock<Vec<Slot>>,
    focus: Mutex<Option<String>>,
    similarity: Box<dyn TitleSimilarity>,
    threshold: f64,
}

impl Default for IdeaLedger {
    fn default() -> Self {
        Self::new(0.85)
    }
}

impl IdeaLedger {
    pub fn new(threshold: f64) -> Self {
        Self::with_similarity(Box::new(SequenceRatio), threshold)
    }

    pub fn with_similarity(similarity: Box<dyn TitleSimilarity>, threshold: f64) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            focus: Mutex::new(None),
            similarity,
            threshold,
        }
    }

    /// Register a new idea, or refine the record whose title matches.
    ///
    /// A new record takes the focus. A refinement is applied only when the
    /// new overview is at least as detailed as the current one, and never
    /// to a rejected record.
    pub fn register_or_refine(
        &self,
        title: &str,
        overview: &str,
        example: &str,
        turn: u32,
        phase: &str,
    ) -> Registration {
        let title = title.trim();
        let existing = {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            self.best_match(&records, title)
        };
        if let Some(slot) = existing {
            return self.refine(&slot, overview, example, turn, phase);
        }

        let registration = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            match self.best_match(&records, title) {
                Some(slot) => {
                    drop(records);
                    return self.refine(&slot, overview, example, turn, phase);
                }
                None => {
                    let record = IdeaRecord {
                        title: title.to_string(),
                        overview: overview.trim().to_string(),
                        example: example.trim().to_string(),
                        status: IdeaStatus::InPlay,
                        rejection_reason: None,
                        first_turn: turn,
                        first_phase: phase.to_string(),
                        last_updated_turn: turn,
                        refinements: Vec::new(),
                    };
                    records.push(Arc::new(Mutex::new(record.clone())));
                    Registration {
                        record,
                        change: LedgerChange::Created,
                    }
                }
            }
        };

        info!(title = %registration.record.title, turn, phase, "idea registered");
        self.set_focus(&registration.record.title);
        registration
    }

    /// Mark the matching record rejected. Returns `None` when no record
    /// matches. Rejecting twice keeps the first reason.
    pub fn reject(&self, title: &str, reason: &str, turn: u32, phase: &str) -> Option<IdeaRecord> {
        let slot = {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            self.best_match(&records, title.trim())?
        };
        let snapshot = {
            let mut record = lock(&slot);
            if record.is_in_play() {
                record.status = IdeaStatus::Rejected;
                record.rejection_reason = Some(reason.trim().to_string());
                record.last_updated_turn = turn;
                info!(title = %record.title, turn, phase, reason, "idea rejected");
            }
            record.clone()
        };
        self.repair_focus();
        Some(snapshot)
    }

    pub fn query_in_play(&self) -> Vec<IdeaRecord> {
        self.snapshot(|r| r.is_in_play())
    }

    pub fn query_rejected(&self) -> Vec<IdeaRecord> {
        self.snapshot(|r| !r.is_in_play())
    }

    /// Fuzzy lookup.
    pub fn get(&self, title: &str) -> Option<IdeaRecord> {
        let slot = {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            self.best_match(&records, title.trim())?
        };
        let record = lock(&slot).clone();
        Some(record)
    }

    /// Title of the focused idea; always an in-play record.
    pub fn current_focus(&self) -> Option<String> {
        let focus = lock(&self.focus);
        let title = focus.as_deref()?;
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let found = records.iter().any(|slot| {
            let r = lock(slot);
            r.title == title && r.is_in_play()
        });
        found.then(|| title.to_string())
    }

    /// Up to `limit` in-play records: the focus first, then the most
    /// recently updated others.
    pub fn memory_cards(&self, limit: usize) -> Vec<IdeaRecord> {
        let focus = self.current_focus();
        let mut in_play = self.query_in_play();
        in_play.sort_by(|a, b| b.last_updated_turn.cmp(&a.last_updated_turn));
        let mut cards = Vec::with_capacity(limit);
        if let Some(title) = &focus {
            if let Some(pos) = in_play.iter().position(|r| &r.title == title) {
                cards.push(in_play.remove(pos));
            }
        }
        cards.extend(in_play);
        cards.truncate(limit);
        cards
    }

    /// Titles of the most recently rejected records, newest last.
    pub fn recently_rejected(&self, limit: usize) -> Vec<String> {
        let mut rejected = self.query_rejected();
        rejected.sort_by_key(|r| r.last_updated_turn);
        let start = rejected.len().saturating_sub(limit);
        rejected[start..].iter().map(|r| r.title.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn best_match(&self, records: &[Slot], title: &str) -> Option<Slot> {
        let mut best: Option<(f64, &Slot)> = None;
        for slot in records {
            let score = self.similarity.ratio(&lock(slot).title, title);
            if score >= self.threshold && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, slot));
            }
        }
        best.map(|(score, slot)| {
            debug!(candidate = title, score, "idea title matched");
            slot.clone()
        })
    }

    fn refine(
        &self,
        slot: &Slot,
        overview: &str,
        example: &str,
        turn: u32,
        phase: &str,
    ) -> Registration {
        let mut record = lock(slot);
        let overview = overview.trim();
        let change = if !record.is_in_play()
            || overview.chars().count() < record.overview.chars().count()
        {
            LedgerChange::Unchanged
        } else {
            record.overview = overview.to_string();
            if !example.trim().is_empty() {
                record.example = example.trim().to_string();
            }
            record.last_updated_turn = record.last_updated_turn.max(turn);
            let refinement = Refinement {
                turn,
                phase: phase.to_string(),
                overview: record.overview.clone(),
                example: record.example.clone(),
            };
            record.refinements.push(refinement);
            info!(title = %record.title, turn, phase, "idea refined");
            LedgerChange::Refined
        };
        Registration {
            record: record.clone(),
            change,
        }
    }

    fn snapshot(&self, keep: impl Fn(&IdeaRecord) -> bool) -> Vec<IdeaRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let out: Vec<IdeaRecord> = records
            .iter()
            .map(|slot| lock(slot).clone())
            .filter(|r| keep(r))
            .collect();
        out
    }

    fn set_focus(&self, title: &str) {
        let mut focus = lock(&self.focus);
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let in_play = records.iter().any(|slot| {
            let r = lock(slot);
            r.title == title && r.is_in_play()
        });
        if in_play {
            *focus = Some(title.to_string());
        }
    }

    /// Move the focus off a rejected record onto the most recently updated
    /// in-play record, or clear it.
    fn repair_focus(&self) {
        let mut focus = lock(&self.focus);
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let snapshot: Vec<IdeaRecord> = records.iter().map(|slot| lock(slot).clone()).collect();
        let still_valid = focus
            .as_deref()
            .is_some_and(|t| snapshot.iter().any(|r| r.title == t && r.is_in_play()));
        if still_valid {
            return;
        }
        // Later registrations win ties.
        let next = snapshot
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_in_play())
            .max_by_key(|(i, r)| (r.last_updated_turn, *i))
            .map(|(_, r)| r.title.clone());
        debug!(from = ?*focus, to = ?next, "idea focus reassigned");
        *focus = next;
    }
}

impl std::fmt::Debug for IdeaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdeaLedger")
            .field("records", &self.len())
            .field("similarity", &self.similarity.name())
            .field("threshold", &self.threshold)
            .finish()
    }
}
