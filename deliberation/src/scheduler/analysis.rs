//! Per-phase group of detached background analyses.
//!
//! ```text
//! exchange ──┬──► spawn(extract idea ──► ledger.register_or_refine) ──┐
//!            ├──► spawn(detect rejection ──► ledger.reject) ──────────┼──► join_all() at phase end
//!            └──► spawn(novelty.observe) ─────────────────────────────┘
//! ```
//!
//! A turn never waits on its own analyses. The phase joins the group
//! before it is summarized, so no analysis outlives its phase.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::events::{DiscussionEvent, SharedEventBus};
use crate::ideas::{IdeaExtractor, IdeaLedger, LedgerChange, NoveltySet};
use crate::transcript::Exchange;

/// What one background task did to shared state.
#[derive(Debug, Clone, PartialEq)]
enum AnalysisOutcome {
    Registered,
    Refined,
    Unchanged,
    Rejected,
    Novelty,
    /// The gate filtered the exchange out or the model found nothing.
    Nothing,
    /// Extraction failed and was discarded.
    Discarded,
}

/// Counts reconciled when a phase joins its analyses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub ideas_registered: usize,
    pub ideas_refined: usize,
    pub ideas_rejected: usize,
    pub extractions_discarded: usize,
    pub novelty_measured: usize,
    /// Tasks that panicked.
    pub lost: usize,
}

pub struct AnalysisGroup {
    extractor: Arc<IdeaExtractor>,
    ledger: Arc<IdeaLedger>,
    novelty: Arc<NoveltySet>,
    bus: SharedEventBus,
    tasks: JoinSet<AnalysisOutcome>,
}

impl AnalysisGroup {
    pub fn new(
        extractor: Arc<IdeaExtractor>,
        ledger: Arc<IdeaLedger>,
        novelty: Arc<NoveltySet>,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            extractor,
            ledger,
            novelty,
            bus,
            tasks: JoinSet::new(),
        }
    }

    /// Number of analyses still running or not yet joined.
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    /// Start every analysis for one persona exchange. Mediator exchanges
    /// never feed idea extraction.
    pub fn spawn(&mut self, exchange: &Exchange) {
        if exchange.is_mediator() {
            return;
        }
        let exchange = Arc::new(exchange.clone());

        {
            let (extractor, ledger, bus, exchange) = self.handles(&exchange);
            self.tasks.spawn(async move {
                match extractor.extract_idea(&exchange).await {
                    Ok(Some(idea)) => {
                        let registration = ledger.register_or_refine(
                            &idea.title,
                            &idea.overview,
                            &idea.example,
                            exchange.turn_index,
                            &exchange.phase_id,
                        );
                        let record = registration.record;
                        match registration.change {
                            LedgerChange::Created => {
                                bus.publish(DiscussionEvent::IdeaRegistered {
                                    phase_id: exchange.phase_id.clone(),
                                    turn_index: exchange.turn_index,
                                    title: record.title,
                                    timestamp: Utc::now(),
                                });
                                AnalysisOutcome::Registered
                            }
                            LedgerChange::Refined => {
                                bus.publish(DiscussionEvent::IdeaRefined {
                                    phase_id: exchange.phase_id.clone(),
                                    turn_index: exchange.turn_index,
                                    refinements: record.refinements.len(),
                                    title: record.title,
                                    timestamp: Utc::now(),
                                });
                                AnalysisOutcome::Refined
                            }
                            LedgerChange::Unchanged => AnalysisOutcome::Unchanged,
                        }
                    }
                    Ok(None) => AnalysisOutcome::Nothing,
                    Err(e) => {
                        debug!(turn = exchange.turn_index, error = %e, "idea extraction discarded");
                        AnalysisOutcome::Discarded
                    }
                }
            });
        }

        {
            let (extractor, ledger, bus, exchange) = self.handles(&exchange);
            self.tasks.spawn(async move {
                let in_play: Vec<String> =
                    ledger.query_in_play().into_iter().map(|r| r.title).collect();
                match extractor.detect_rejection(&exchange, &in_play).await {
                    Ok(Some(verdict)) => {
                        let rejected = ledger.reject(
                            &verdict.idea_title,
                            &verdict.rejection_reason,
                            exchange.turn_index,
                            &exchange.phase_id,
                        );
                        match rejected {
                            Some(record) => {
                                bus.publish(DiscussionEvent::IdeaRejected {
                                    phase_id: exchange.phase_id.clone(),
                                    turn_index: exchange.turn_index,
                                    title: record.title,
                                    reason: verdict.rejection_reason,
                                    timestamp: Utc::now(),
                                });
                                AnalysisOutcome::Rejected
                            }
                            None => {
                                debug!(title = %verdict.idea_title, "rejection names no known idea");
                                AnalysisOutcome::Nothing
                            }
                        }
                    }
                    Ok(None) => AnalysisOutcome::Nothing,
                    Err(e) => {
                        debug!(turn = exchange.turn_index, error = %e, "rejection check discarded");
                        AnalysisOutcome::Discarded
                    }
                }
            });
        }

        let novelty = self.novelty.clone();
        let bus = self.bus.clone();
        self.tasks.spawn(async move {
            let measured = novelty.observe(&exchange.phase_id, exchange.turn_index, &exchange.text);
            bus.publish(DiscussionEvent::NoveltyMeasured {
                phase_id: measured.phase_id,
                turn_index: measured.turn_index,
                new_phrases: measured.new_phrases,
                total_phrases: measured.total_phrases,
                timestamp: Utc::now(),
            });
            AnalysisOutcome::Novelty
        });
    }

    /// Wait for every outstanding analysis.
    pub async fn join_all(&mut self) -> AnalysisReport {
        let mut report = AnalysisReport::default();
        while let Some(res) = self.tasks.join_next().await {
            match res {
                Ok(AnalysisOutcome::Registered) => report.ideas_registered += 1,
                Ok(AnalysisOutcome::Refined) => report.ideas_refined += 1,
                Ok(AnalysisOutcome::Rejected) => report.ideas_rejected += 1,
                Ok(AnalysisOutcome::Discarded) => report.extractions_discarded += 1,
                Ok(AnalysisOutcome::Novelty) => report.novelty_measured += 1,
                Ok(AnalysisOutcome::Unchanged | AnalysisOutcome::Nothing) => {}
                Err(e) => {
                    warn!(error = %e, "background analysis panicked");
                    report.lost += 1;
                }
            }
        }
        report
    }

    fn handles(
        &self,
        exchange: &Arc<Exchange>,
    ) -> (Arc<IdeaExtractor>, Arc<IdeaLedger>, SharedEventBus, Arc<Exchange>) {
        (
            self.extractor.clone(),
            self.ledger.clone(),
            self.bus.clone(),
            exchange.clone(),
        )
    }
}
