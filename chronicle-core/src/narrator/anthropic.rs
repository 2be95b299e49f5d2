//! Anthropic Messages API provider.

use super::{Narrator, NarratorError, Prompt, PromptRole};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
pub(crate) const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub(crate) const DEFAULT_MAX_TOKENS: usize = 1024;

#[derive(Clone)]
pub struct AnthropicNarrator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: usize,
}

impl AnthropicNarrator {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Create from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, NarratorError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| NarratorError::NoApiKey)?;
        Ok(Self::new(api_key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_headers(&self) -> Result<HeaderMap, NarratorError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|_| NarratorError::NoApiKey)?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn build_request<'a>(&'a self, prompt: &'a Prompt) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: (!prompt.system.is_empty()).then_some(prompt.system.as_str()),
            messages: prompt
                .messages
                .iter()
                .map(|m| ApiMessage {
                    role: match m.role {
                        PromptRole::User => "user",
                        PromptRole::Assistant => "assistant",
                    },
                    content: &m.content,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Narrator for AnthropicNarrator {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn narrate(&self, prompt: &Prompt) -> Result<String, NarratorError> {
        let response = self
            .client
            .post(format!("{API_BASE}/messages"))
            .headers(self.build_headers()?)
            .json(&self.build_request(prompt))
            .send()
            .await
            .map_err(|e| NarratorError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(NarratorError::Api { status, message });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| NarratorError::Parse(e.to_string()))?;

        let text = api_response.text();
        if text.trim().is_empty() {
            return Err(NarratorError::Empty);
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl ApiResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ApiContent::Text { text } => Some(text.as_str()),
                ApiContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrator::PromptMessage;

    #[test]
    fn test_request_shape() {
        let narrator = AnthropicNarrator::new("key").with_model("test-model").with_max_tokens(256);
        let prompt = Prompt::new("You are the narrator.").with_message(PromptMessage::user("Look around"));
        let json = serde_json::to_value(narrator.build_request(&prompt)).unwrap();

        assert_eq!(json["model"], "test-model");
        assert_eq!(json["max_tokens"], 256);
        assert_eq!(json["system"], "You are the narrator.");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Look around");
    }

    #[test]
    fn test_response_text_skips_other_blocks() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"The gate "},{"type":"thinking"},{"type":"text","text":"opens."}]}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "The gate opens.");
    }
}
