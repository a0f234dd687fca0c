//! Participant profiles and the closed set of speaker kinds.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::completion::{complete_with_timeout, CompletionRequest, RequestPurpose};
use crate::completion::{ChatMessage, CompletionClient};
use crate::errors::Result;
use crate::transcript::SpeakerKind;

/// Identifier the mediator speaks under.
pub const MEDIATOR_ID: &str = "Mediator";

/// Read-only persona profile supplied by the persona store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub name: String,
    pub role_description: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub capabilities: String,
    #[serde(default)]
    pub failure_mode: String,
}

impl PersonaProfile {
    pub fn new(name: impl Into<String>, role_description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role_description: role_description.into(),
            purpose: String::new(),
            capabilities: String::new(),
            failure_mode: String::new(),
        }
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn with_failure_mode(mut self, failure_mode: impl Into<String>) -> Self {
        self.failure_mode = failure_mode.into();
        self
    }

    /// System framing for this persona's generation calls.
    pub fn system_prompt(&self) -> String {
        let mut out = format!("You are {}, {}.", self.name, self.role_description);
        if !self.purpose.is_empty() {
            out.push_str(&format!("\nPurpose: {}", self.purpose));
        }
        if !self.capabilities.is_empty() {
            out.push_str(&format!("\nCapabilities: {}", self.capabilities));
        }
        if !self.failure_mode.is_empty() {
            out.push_str(&format!("\nWatch out for your failure mode: {}", self.failure_mode));
        }
        out
    }

    /// Every descriptive field, lowercased, for relevance ranking.
    pub fn searchable_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.role_description, self.purpose, self.capabilities, self.failure_mode
        )
        .to_lowercase()
    }
}

/// A fully rendered prompt for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnPrompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

impl TurnPrompt {
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system.clone()),
            ChatMessage::user(self.user.clone()),
        ]
    }
}

/// Whoever can take a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Participant {
    Persona(Arc<PersonaProfile>),
    /// Neutral arbiter with no belief state.
    Mediator,
}

impl Participant {
    pub fn id(&self) -> &str {
        match self {
            Self::Persona(profile) => &profile.name,
            Self::Mediator => MEDIATOR_ID,
        }
    }

    pub fn kind(&self) -> SpeakerKind {
        match self {
            Self::Persona(_) => SpeakerKind::Persona,
            Self::Mediator => SpeakerKind::Mediator,
        }
    }

    /// The mediator never mutates a belief state.
    pub fn holds_beliefs(&self) -> bool {
        matches!(self, Self::Persona(_))
    }

    /// Run one generation for this participant.
    pub async fn produce_turn(
        &self,
        client: &dyn CompletionClient,
        model: &str,
        prompt: &TurnPrompt,
        timeout: std::time::Duration,
    ) -> Result<String> {
        let purpose = match self {
            Self::Persona(_) => RequestPurpose::PersonaTurn,
            Self::Mediator => RequestPurpose::MediatorTurn,
        };
        let request = CompletionRequest::new(model, purpose, prompt.messages())
            .with_max_tokens(prompt.max_tokens)
            .for_participant(self.id());
        let text = complete_with_timeout(client, request, timeout).await?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompletion;
    use std::time::Duration;

    fn ada() -> Arc<PersonaProfile> {
        Arc::new(
            PersonaProfile::new("Ada", "a pragmatic engineer")
                .with_purpose("keep ideas buildable")
                .with_failure_mode("dismisses user research"),
        )
    }

    #[test]
    fn test_system_prompt_includes_profile() {
        let prompt = ada().system_prompt();
        assert!(prompt.starts_with("You are Ada, a pragmatic engineer."));
        assert!(prompt.contains("Purpose: keep ideas buildable"));
        assert!(prompt.contains("failure mode: dismisses user research"));
        assert!(!prompt.contains("Capabilities"));
    }

    #[test]
    fn test_participant_kinds() {
        let persona = Participant::Persona(ada());
        assert_eq!(persona.id(), "Ada");
        assert!(persona.holds_beliefs());
        assert_eq!(Participant::Mediator.id(), MEDIATOR_ID);
        assert!(!Participant::Mediator.holds_beliefs());
        assert_eq!(Participant::Mediator.kind(), SpeakerKind::Mediator);
    }

    #[tokio::test]
    async fn test_produce_turn_tags_request() {
        let client = ScriptedCompletion::constant("  my answer \n");
        let prompt = TurnPrompt {
            system: "sys".into(),
            user: "usr".into(),
            max_tokens: 100,
        };
        let text = Participant::Mediator
            .produce_turn(&client, "m", &prompt, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(text, "my answer");
        let calls = client.calls();
        assert_eq!(calls[0].purpose, RequestPurpose::MediatorTurn);
        assert_eq!(calls[0].participant.as_deref(), Some(MEDIATOR_ID));
        assert_eq!(calls[0].max_tokens, Some(100));
    }
}
