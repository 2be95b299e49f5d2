//! The narrator capability: prompt in, prose out.
//!
//! The orchestrator only ever sees [`Narrator`]. Concrete providers talk to
//! hosted or local models, and [`NarratorChain`] tries several in rank order.

mod anthropic;
mod openai_compat;
pub mod prompt;

pub use anthropic::AnthropicNarrator;
pub use openai_compat::OpenAiCompatNarrator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from narrator providers.
#[derive(Debug, Clone, Error)]
pub enum NarratorError {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Narrator returned no text")]
    Empty,

    #[error("All narrators failed: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// A fully assembled narrator request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub messages: Vec<PromptMessage>,
}

impl Prompt {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: PromptMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// The final user message, if any.
    pub fn last_user(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == PromptRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Anything that turns a prompt into narration.
#[async_trait]
pub trait Narrator: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    async fn narrate(&self, prompt: &Prompt) -> Result<String, NarratorError>;
}

/// Ranked providers; the first success wins.
#[derive(Clone, Default)]
pub struct NarratorChain {
    providers: Vec<Arc<dyn Narrator>>,
}

impl NarratorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn Narrator>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl Narrator for NarratorChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn narrate(&self, prompt: &Prompt) -> Result<String, NarratorError> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.narrate(prompt).await {
                Ok(text) => {
                    debug!(provider = provider.name(), "narration received");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "narrator failed, trying next");
                    failures.push(format!("{}: {e}", provider.name()));
                }
            }
        }
        Err(NarratorError::Exhausted(failures))
    }
}

/// Provider settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarratorConfig {
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub max_tokens: usize,
    /// Local OpenAI-compatible endpoint, used as a fallback when set.
    pub ollama_base_url: Option<String>,
    pub ollama_model: String,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            anthropic_model: anthropic::DEFAULT_MODEL.to_string(),
            max_tokens: anthropic::DEFAULT_MAX_TOKENS,
            ollama_base_url: None,
            ollama_model: openai_compat::DEFAULT_MODEL.to_string(),
        }
    }
}

impl NarratorConfig {
    /// Read `ANTHROPIC_API_KEY`, `CHRONICLE_MODEL`, `CHRONICLE_MAX_TOKENS`,
    /// `OLLAMA_BASE_URL` and `OLLAMA_MODEL`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            anthropic_model: var("CHRONICLE_MODEL").unwrap_or(defaults.anthropic_model),
            max_tokens: var("CHRONICLE_MAX_TOKENS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_tokens),
            ollama_base_url: var("OLLAMA_BASE_URL"),
            ollama_model: var("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
        }
    }

    /// Build the provider chain: hosted model first, local fallback second.
    pub fn build_chain(&self) -> Result<NarratorChain, NarratorError> {
        let mut chain = NarratorChain::new();
        if let Some(key) = &self.anthropic_api_key {
            chain = chain.with(Arc::new(
                AnthropicNarrator::new(key)
                    .with_model(&self.anthropic_model)
                    .with_max_tokens(self.max_tokens),
            ));
        }
        if let Some(url) = &self.ollama_base_url {
            chain = chain.with(Arc::new(
                OpenAiCompatNarrator::new(url, &self.ollama_model).with_max_tokens(self.max_tokens),
            ));
        }
        if chain.is_empty() {
            return Err(NarratorError::NoApiKey);
        }
        Ok(chain)
    }
}
