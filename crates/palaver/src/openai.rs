//! HTTP completion client for OpenAI-compatible `chat/completions` servers.

use async_trait::async_trait;
use deliberation::completion::{ChatMessage, CompletionClient, CompletionRequest};
use deliberation::errors::{DeliberationError, GenerationFailure};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EndpointConfig;

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiCompletion {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompletion {
    pub fn new(config: &EndpointConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// JSON body for one request. `json_mode` becomes
/// `response_format: {"type": "json_object"}`.
pub fn request_body(request: &CompletionRequest) -> serde_json::Value {
    let body = ChatBody {
        model: &request.model,
        messages: &request.messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        response_format: request.json_mode.then_some(ResponseFormat {
            kind: "json_object",
        }),
    };
    serde_json::to_value(body).unwrap_or(serde_json::Value::Null)
}

/// Text of the first choice.
pub fn parse_response(raw: &str) -> deliberation::Result<String> {
    let response: ChatResponse = serde_json::from_str(raw).map_err(|e| {
        DeliberationError::generation(GenerationFailure::Malformed, format!("response body: {e}"))
    })?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| DeliberationError::generation(GenerationFailure::EmptyResponse, "no choices returned"))
}

#[async_trait]
impl CompletionClient for OpenAiCompletion {
    async fn complete(&self, request: CompletionRequest) -> deliberation::Result<String> {
        let body = request_body(&request);
        let mut call = self.http.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        debug!(purpose = %request.purpose, model = %request.model, "sending completion");

        let response = call.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                GenerationFailure::Timeout
            } else {
                GenerationFailure::Backend
            };
            DeliberationError::generation(kind, e.to_string())
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeliberationError::generation(GenerationFailure::Backend, e.to_string()))?;
        if !status.is_success() {
            warn!(%status, purpose = %request.purpose, "backend rejected completion");
            let snippet: String = text.chars().take(200).collect();
            return Err(DeliberationError::generation(
                GenerationFailure::Backend,
                format!("HTTP {status}: {snippet}"),
            ));
        }
        parse_response(&text)
    }
}
