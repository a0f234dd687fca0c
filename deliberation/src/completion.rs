//! Completion seam: the only way the core talks to a text-generation backend.
//!
//! ```text
//! scheduler / mediator / analyses
//!        │  CompletionRequest { model, messages, json_mode, purpose, .. }
//!        ▼
//!   complete_with_timeout ──► dyn CompletionClient ──► String
//!        │ (elapsed)
//!        └──► GenerationError::Timeout
//! ```
//!
//! Real clients live outside this crate. [`ScriptedCompletion`] is a
//! deterministic client for tests and dry runs.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{DeliberationError, GenerationFailure, Result};

/// Role tag on a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What a completion call is for. Backends ignore it; logs and test
/// clients route on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPurpose {
    PersonaTurn,
    MediatorTurn,
    ParticipantSelection,
    TurnDecision,
    PhaseSummary,
    BeliefUpdate,
    SummaryUpdate,
    IdeaExtraction,
    RejectionCheck,
}

impl fmt::Display for RequestPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PersonaTurn => write!(f, "persona_turn"),
            Self::MediatorTurn => write!(f, "mediator_turn"),
            Self::ParticipantSelection => write!(f, "participant_selection"),
            Self::TurnDecision => write!(f, "turn_decision"),
            Self::PhaseSummary => write!(f, "phase_summary"),
            Self::BeliefUpdate => write!(f, "belief_update"),
            Self::SummaryUpdate => write!(f, "summary_update"),
            Self::IdeaExtraction => write!(f, "idea_extraction"),
            Self::RejectionCheck => write!(f, "rejection_check"),
        }
    }
}

/// One request to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Ask the backend to guarantee a JSON object.
    pub json_mode: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub purpose: RequestPurpose,
    /// Participant the request is made on behalf of, if any.
    pub participant: Option<String>,
}

/// Sampling temperature for the JSON analysis calls (beliefs, summaries,
/// idea extraction and rejection checks).
pub const ANALYSIS_TEMPERATURE: f32 = 0.2;

impl CompletionRequest {
    pub fn new(
        model: impl Into<String>,
        purpose: RequestPurpose,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            json_mode: false,
            max_tokens: None,
            temperature: None,
            purpose,
            participant: None,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn for_participant(mut self, participant: impl Into<String>) -> Self {
        self.participant = Some(participant.into());
        self
    }

    /// Concatenated content of every message, for routing and logging.
    pub fn full_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Stateless request/response call to a text-generation backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Return the backend's text, or a `Generation` error.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Shared reference to a completion client.
pub type SharedCompletionClient = Arc<dyn CompletionClient>;

/// Run a completion with a deadline. Elapsed deadlines become
/// `GenerationFailure::Timeout`; empty answers become `GenerationFailure::EmptyResponse`.
pub async fn complete_with_timeout(
    client: &dyn CompletionClient,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<String> {
    let purpose = request.purpose;
    match tokio::time::timeout(timeout, client.complete(request)).await {
        Ok(Ok(text)) if text.trim().is_empty() => Err(DeliberationError::generation(
            GenerationFailure::EmptyResponse,
            format!("{purpose} returned no text"),
        )),
        Ok(Ok(text)) => {
            debug!(%purpose, chars = text.len(), "completion returned");
            Ok(text)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(%purpose, timeout_secs = timeout.as_secs(), "completion timed out");
            Err(DeliberationError::timeout(timeout.as_secs()))
        }
    }
}

/// Strip a surrounding Markdown code fence (```json ... ``` or ``` ... ```).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse a JSON payload that may be wrapped in a code fence or surrounded
/// by prose. Falls back to the outermost `{ ... }` span.
pub fn parse_json_block<T: DeserializeOwned>(text: &str) -> std::result::Result<T, serde_json::Error> {
    let body = strip_code_fences(text);
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first) => match (body.find('{'), body.rfind('}')) {
            (Some(start), Some(end)) if end > start => serde_json::from_str(&body[start..=end]),
            _ => Err(first),
        },
    }
}

type Responder = dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync;

/// Deterministic client that answers from a closure and records every request.
pub struct ScriptedCompletion {
    responder: Box<Responder>,
    delay: Option<Duration>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    /// Answer every request with `responder`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with the same text.
    pub fn constant(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Fail every request with a backend error.
    pub fn failing() -> Self {
        Self::new(|req| {
            Err(DeliberationError::generation(
                GenerationFailure::Backend,
                format!("scripted failure for {}", req.purpose),
            ))
        })
    }

    /// Answer with `responses` in order, then with `fallback` forever.
    pub fn queued<I, S>(responses: I, fallback: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue: Mutex<VecDeque<String>> =
            Mutex::new(responses.into_iter().map(Into::into).collect());
        let fallback = fallback.into();
        Self::new(move |_| {
            let next = queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .pop_front();
            Ok(next.unwrap_or_else(|| fallback.clone()))
        })
    }

    /// Sleep before answering (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of requests received for one purpose.
    pub fn call_count(&self, purpose: RequestPurpose) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|r| r.purpose == purpose)
            .count()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let answer = (self.responder)(&request);
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(purpose: RequestPurpose) -> CompletionRequest {
        CompletionRequest::new("test-model", purpose, vec![ChatMessage::user("hello")])
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {\"b\": 2}  "), "{\"b\": 2}");
    }

    #[test]
    fn test_parse_json_block_with_prose() {
        #[derive(Deserialize)]
        struct Payload {
            ok: bool,
        }
        let parsed: Payload = parse_json_block("Sure! Here it is: {\"ok\": true} hope that helps")
            .expect("should find the object");
        assert!(parsed.ok);
        assert!(parse_json_block::<Payload>("no json here").is_err());
    }

    #[test]
    fn test_request_builders() {
        let req = request(RequestPurpose::TurnDecision)
            .json()
            .with_max_tokens(64)
            .for_participant("Ada");
        assert!(req.json_mode);
        assert_eq!(req.max_tokens, Some(64));
        assert_eq!(req.participant.as_deref(), Some("Ada"));
        assert_eq!(req.full_text(), "hello");
    }

    #[tokio::test]
    async fn test_scripted_records_calls() {
        let client = ScriptedCompletion::constant("answer");
        let out = client.complete(request(RequestPurpose::PersonaTurn)).await.unwrap();
        assert_eq!(out, "answer");
        client.complete(request(RequestPurpose::BeliefUpdate)).await.unwrap();
        assert_eq!(client.calls().len(), 2);
        assert_eq!(client.call_count(RequestPurpose::BeliefUpdate), 1);
    }

    #[tokio::test]
    async fn test_queued_then_fallback() {
        let client = ScriptedCompletion::queued(["first", "second"], "rest");
        let mut answers = Vec::new();
        for _ in 0..4 {
            answers.push(client.complete(request(RequestPurpose::PersonaTurn)).await.unwrap());
        }
        assert_eq!(answers, vec!["first", "second", "rest", "rest"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_generation_timeout() {
        let client = ScriptedCompletion::constant("late").with_delay(Duration::from_secs(10));
        let err = complete_with_timeout(
            &client,
            request(RequestPurpose::PersonaTurn),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert_eq!(err.generation_kind(), Some(GenerationFailure::Timeout));
    }

    #[tokio::test]
    async fn test_empty_answer_is_generation_error() {
        let client = ScriptedCompletion::constant("   ");
        let err = complete_with_timeout(
            &client,
            request(RequestPurpose::PersonaTurn),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.generation_kind(), Some(GenerationFailure::EmptyResponse));
    }

    #[tokio::test]
    async fn test_mock_client_error_passes_through() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete().times(1).returning(|_| {
            Err(DeliberationError::generation(GenerationFailure::Backend, "503"))
        });
        let err = complete_with_timeout(
            &mock,
            request(RequestPurpose::TurnDecision),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.generation_kind(), Some(GenerationFailure::Backend));
    }
}
