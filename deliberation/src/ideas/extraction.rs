//! Idea and rejection extraction.
//!
//! Both analyses run a cheap keyword gate first and only then pay for a
//! structured completion call:
//!
//! ```text
//! exchange ──► ProposalGate ──(pass)──► IdeaExtraction JSON ──► ExtractedIdea
//!          └─► RejectionGate ─(pass)──► RejectionCheck JSON ──► RejectionVerdict
//! ```
//!
//! Any parse failure is an `ExtractionError`: the attempt is discarded and the
//! ledger is untouched.

use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::debug;

use crate::completion::{
    complete_with_timeout, parse_json_block, ChatMessage, CompletionRequest, RequestPurpose,
    SharedCompletionClient, ANALYSIS_TEMPERATURE,
};
use crate::config::IdeaConfig;
use crate::errors::{DeliberationError, Result};
use crate::text::contains_any;
use crate::transcript::Exchange;

/// Passes only exchanges that read like a detailed proposal.
#[derive(Debug, Clone)]
pub struct ProposalGate {
    patterns: Vec<Regex>,
    min_trailing_chars: usize,
}

impl ProposalGate {
    pub fn new(patterns: &[String], min_trailing_chars: usize) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .dot_matches_new_line(true)
                    .build()
                    .map_err(|e| {
                        DeliberationError::configuration(format!("proposal pattern '{p}': {e}"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            min_trailing_chars,
        })
    }

    pub fn from_config(config: &IdeaConfig) -> Result<Self> {
        Self::new(&config.proposal_patterns, config.min_proposal_chars)
    }

    /// A marker must match with enough text after it to be a real proposal.
    pub fn is_detailed_proposal(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| {
            re.find_iter(text)
                .any(|m| text[m.end()..].trim().chars().count() > self.min_trailing_chars)
        })
    }
}

/// Passes only exchanges that contain explicit negative sentiment.
#[derive(Debug, Clone)]
pub struct RejectionGate {
    keywords: Vec<String>,
}

impl RejectionGate {
    pub fn new(keywords: Vec<String>) -> Self {
        Self { keywords }
    }

    pub fn from_config(config: &IdeaConfig) -> Self {
        Self::new(config.rejection_keywords.clone())
    }

    pub fn mentions_rejection(&self, text: &str) -> bool {
        contains_any(text, &self.keywords)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtractedIdea {
    pub title: String,
    pub overview: String,
    #[serde(default)]
    pub example: String,
}

#[derive(Debug, Deserialize)]
struct IdeaPayload {
    #[serde(default)]
    has_idea: bool,
    #[serde(default)]
    title: String,
    #[serde(default)]
    overview: String,
    #[serde(default)]
    example: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RejectionVerdict {
    #[serde(default)]
    pub rejected: bool,
    #[serde(default)]
    pub idea_title: String,
    #[serde(default)]
    pub rejection_reason: String,
}

/// Runs the gated extraction calls.
#[derive(Clone)]
pub struct IdeaExtractor {
    client: SharedCompletionClient,
    model: String,
    timeout: Duration,
    proposals: ProposalGate,
    rejections: RejectionGate,
}

impl IdeaExtractor {
    pub fn new(
        client: SharedCompletionClient,
        model: impl Into<String>,
        timeout: Duration,
        config: &IdeaConfig,
    ) -> Result<Self> {
        Ok(Self {
            client,
            model: model.into(),
            timeout,
            proposals: ProposalGate::from_config(config)?,
            rejections: RejectionGate::from_config(config),
        })
    }

    /// `Ok(None)` when the gate filters the exchange out or the model finds
    /// no concrete idea.
    pub async fn extract_idea(&self, exchange: &Exchange) -> Result<Option<ExtractedIdea>> {
        if exchange.is_mediator() || !self.proposals.is_detailed_proposal(&exchange.text) {
            return Ok(None);
        }
        let request = CompletionRequest::new(
            &self.model,
            RequestPurpose::IdeaExtraction,
            vec![
                ChatMessage::system(
                    "You extract concrete solution proposals from discussion turns. Reply with JSON only.",
                ),
                ChatMessage::user(format!(
                    "{} said:\n{}\n\nIf this proposes a concrete solution, return \
                     {{\"has_idea\": true, \"title\": short name, \"overview\": one paragraph, \
                     \"example\": one concrete usage example}}. Otherwise return {{\"has_idea\": false}}.",
                    exchange.speaker_id, exchange.text
                )),
            ],
        )
        .json()
        .with_temperature(ANALYSIS_TEMPERATURE)
        .for_participant(&exchange.speaker_id);

        let raw = complete_with_timeout(self.client.as_ref(), request, self.timeout)
            .await
            .map_err(DeliberationError::into_extraction)?;
        let payload: IdeaPayload = parse_json_block(&raw)
            .map_err(|e| DeliberationError::extraction(format!("idea payload: {e}")))?;
        if !payload.has_idea {
            return Ok(None);
        }
        if payload.title.trim().is_empty() || payload.overview.trim().is_empty() {
            return Err(DeliberationError::extraction("idea payload missing title or overview"));
        }
        debug!(title = %payload.title, turn = exchange.turn_index, "idea extracted");
        Ok(Some(ExtractedIdea {
            title: payload.title.trim().to_string(),
            overview: payload.overview,
            example: payload.example,
        }))
    }

    /// `Ok(None)` when the gate filters the exchange out, nothing is in
    /// play, or the model does not confirm a rejection of a named idea.
    pub async fn detect_rejection(
        &self,
        exchange: &Exchange,
        in_play_titles: &[String],
    ) -> Result<Option<RejectionVerdict>> {
        if exchange.is_mediator()
            || in_play_titles.is_empty()
            || !self.rejections.mentions_rejection(&exchange.text)
        {
            return Ok(None);
        }
        let request = CompletionRequest::new(
            &self.model,
            RequestPurpose::RejectionCheck,
            vec![
                ChatMessage::system(
                    "You decide whether a discussion turn rejects one of the ideas in play. Reply with JSON only.",
                ),
                ChatMessage::user(format!(
                    "Ideas in play: {}\n\n{} said:\n{}\n\nReturn {{\"rejected\": bool, \
                     \"idea_title\": exact title from the list, \"rejection_reason\": short reason}}.",
                    in_play_titles.join(", "),
                    exchange.speaker_id,
                    exchange.text
                )),
            ],
        )
        .json()
        .with_temperature(ANALYSIS_TEMPERATURE)
        .for_participant(&exchange.speaker_id);

        let raw = complete_with_timeout(self.client.as_ref(), request, self.timeout)
            .await
            .map_err(DeliberationError::into_extraction)?;
        let verdict: RejectionVerdict = parse_json_block(&raw)
            .map_err(|e| DeliberationError::extraction(format!("rejection payload: {e}")))?;
        if !verdict.rejected || verdict.idea_title.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(verdict))
    }
}
