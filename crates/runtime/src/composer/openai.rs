//! OpenAI-compatible chat completions (OpenAI, DashScope compatible mode, vLLM, ...).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ComposeError, Composer, ConversationTurn, Role};
use crate::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
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

/// Builder for creating an OpenAI-compatible composer.
#[derive(Debug, Clone)]
pub struct OpenAiComposerBuilder {
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiComposerBuilder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the composer.
    pub fn build(self) -> Result<OpenAiComposer> {
        let base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("base url is empty".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("api key is empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Config("model is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        Ok(OpenAiComposer {
            client,
            endpoint: format!("{base_url}/chat/completions"),
            api_key: self.api_key,
            model: self.model,
        })
    }
}

/// Composer backed by a `/chat/completions` endpoint.
pub struct OpenAiComposer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiComposer {
    pub fn builder(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> OpenAiComposerBuilder {
        OpenAiComposerBuilder::new(base_url, api_key, model)
    }

    fn role_to_api_str(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User | Role::ToolResult => "user",
        }
    }

    fn request_body<'a>(&'a self, turns: &'a [ConversationTurn]) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.model,
            messages: turns
                .iter()
                .map(|turn| ApiMessage {
                    role: Self::role_to_api_str(turn.role),
                    content: &turn.content,
                })
                .collect(),
        }
    }
}

impl std::fmt::Display for OpenAiComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "openai({}, {})", self.model, self.endpoint)
    }
}

impl std::fmt::Debug for OpenAiComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiComposer")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Composer for OpenAiComposer {
    async fn compose(&self, turns: &[ConversationTurn]) -> std::result::Result<String, ComposeError> {
        debug!(model = %self.model, turns = turns.len(), "requesting completion");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(turns))
            .send()
            .await
            .map_err(|e| ComposeError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ComposeError::Api { status, body });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ComposeError::InvalidResponse(e.to_string()))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ComposeError::InvalidResponse("no message content in choices".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn composer() -> OpenAiComposer {
        OpenAiComposer::builder("https://example.com/compatible-mode/v1/", "sk-test", "qwen-max")
            .build()
            .unwrap()
    }

    #[test]
    fn endpoint_appends_chat_completions() {
        assert_eq!(
            composer().endpoint,
            "https://example.com/compatible-mode/v1/chat/completions"
        );
    }

    #[test]
    fn tool_results_are_sent_as_user() {
        let composer = composer();
        let turns = [
            ConversationTurn::system("be brief"),
            ConversationTurn::tool_result("28 °C"),
            ConversationTurn::user("what to wear?"),
        ];
        let body = serde_json::to_value(composer.request_body(&turns)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "qwen-max",
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "28 °C" },
                    { "role": "user", "content": "what to wear?" },
                ]
            })
        );
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let err = OpenAiComposer::builder("https://example.com/v1", "  ", "qwen-max")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = OpenAiComposer::builder("", "sk-test", "qwen-max").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn display_hides_key() {
        let shown = format!("{} {:?}", composer(), composer());
        assert!(shown.contains("qwen-max"));
        assert!(!shown.contains("sk-test"));
    }
}
