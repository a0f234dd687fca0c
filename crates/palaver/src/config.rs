use std::time::Duration;

/// OpenAI-compatible endpoint the runner talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Base URL including the version prefix, e.g. `http://localhost:8080/v1`.
    pub url: String,
    pub api_key: Option<String>,
    /// Model for persona, mediator and analysis calls.
    pub model: String,
    /// Model for facilitator calls. `None` selects the heuristic facilitator.
    pub facilitator_model: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("PALAVER_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
            api_key: std::env::var("PALAVER_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("PALAVER_MODEL").unwrap_or_else(|_| "default".into()),
            facilitator_model: std::env::var("PALAVER_FACILITATOR_MODEL")
                .ok()
                .filter(|m| !m.is_empty()),
        }
    }
}

impl EndpointConfig {
    /// Apply CLI overrides on top of the environment.
    pub fn with_overrides(mut self, model: Option<String>, facilitator_model: Option<String>) -> Self {
        if let Some(model) = model {
            self.model = model;
        }
        if facilitator_model.is_some() {
            self.facilitator_model = facilitator_model;
        }
        self
    }
}

/// Check if an endpoint is reachable (GET `{url}/models`).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> EndpointConfig {
        EndpointConfig {
            url: "http://localhost:8080/v1".into(),
            api_key: None,
            model: "m".into(),
            facilitator_model: None,
        }
    }

    #[test]
    fn test_overrides_replace_only_given_values() {
        let cfg = base().with_overrides(None, Some("f".into()));
        assert_eq!(cfg.model, "m");
        assert_eq!(cfg.facilitator_model.as_deref(), Some("f"));

        let cfg = base().with_overrides(Some("big".into()), None);
        assert_eq!(cfg.model, "big");
        assert_eq!(cfg.facilitator_model, None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_false() {
        assert!(!check_endpoint("http://127.0.0.1:9/v1").await);
    }
}
