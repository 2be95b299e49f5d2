//! OpenAI-compatible chat completions provider (Ollama, llama.cpp, vLLM).

use super::{Narrator, NarratorError, Prompt, PromptRole};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub(crate) const DEFAULT_MODEL: &str = "llama3.1";

#[derive(Clone)]
pub struct OpenAiCompatNarrator {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: Option<usize>,
}

impl OpenAiCompatNarrator {
    pub fn new(base_url: &str, model: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn build_messages(prompt: &Prompt) -> Vec<ChatMessage<'_>> {
        let mut messages = Vec::with_capacity(prompt.messages.len() + 1);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &prompt.system,
            });
        }
        messages.extend(prompt.messages.iter().map(|m| ChatMessage {
            role: match m.role {
                PromptRole::User => "user",
                PromptRole::Assistant => "assistant",
            },
            content: &m.content,
        }));
        messages
    }
}

#[async_trait]
impl Narrator for OpenAiCompatNarrator {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn narrate(&self, prompt: &Prompt) -> Result<String, NarratorError> {
        let request = ChatRequest {
            model: &self.model,
            messages: Self::build_messages(prompt),
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| NarratorError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(NarratorError::Api { status, message });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| NarratorError::Parse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(NarratorError::Empty)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}
