//! LLM access: the completion service seam and its HTTP implementation.
//!
//! `CompletionService` is what the rest of the crate talks to. `ChatClient`
//! implements it over `OpenAiClient` with model aliasing and a default model.

pub mod client;
pub mod types;

use async_trait::async_trait;

use client::{LlmError, OpenAiClient};
use types::{resolve_model, ChatRequest, Message, UsageStats};

/// Per-call model selection.
#[derive(Debug, Clone, Default)]
pub struct ModelParams {
    /// None means the service's default model.
    pub model: Option<String>,
    pub max_completion_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Text plus whatever usage the service reported.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Option<UsageStats>,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// The external text-completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Send the turns as-is and return the generated text.
    async fn complete(
        &self,
        messages: &[Message],
        params: &ModelParams,
    ) -> Result<Completion, LlmError>;
}

/// Chat Completions client with model routing.
#[derive(Debug)]
pub struct ChatClient {
    client: OpenAiClient,
    default_model: String,
}

impl ChatClient {
    /// Create a client with an explicit API key and default model.
    pub fn new(api_key: String, default_model: &str) -> Self {
        Self {
            client: OpenAiClient::new(api_key),
            default_model: resolve_model(default_model).to_string(),
        }
    }

    /// Create a client reading OPENAI_API_KEY from the environment.
    pub fn from_env(default_model: &str, base_url: Option<&str>) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            LlmError::MissingApiKey("OPENAI_API_KEY environment variable not set".into())
        })?;
        Ok(match base_url {
            Some(url) => Self::with_base_url(api_key, default_model, url.to_string()),
            None => Self::new(api_key, default_model),
        })
    }

    /// Create a client with a custom base URL.
    pub fn with_base_url(api_key: String, default_model: &str, base_url: String) -> Self {
        Self {
            client: OpenAiClient::with_base_url(api_key, base_url),
            default_model: resolve_model(default_model).to_string(),
        }
    }

    /// Get the default model (resolved to full ID).
    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[async_trait]
impl CompletionService for ChatClient {
    async fn complete(
        &self,
        messages: &[Message],
        params: &ModelParams,
    ) -> Result<Completion, LlmError> {
        let model = params
            .model
            .as_deref()
            .map(|m| resolve_model(m).to_string())
            .unwrap_or_else(|| self.default_model.clone());

        let request = ChatRequest {
            model,
            messages: messages.to_vec(),
            max_completion_tokens: params.max_completion_tokens,
            temperature: params.temperature,
        };

        let response = self.client.chat(&request).await?;
        let text = response
            .text()
            .ok_or_else(|| LlmError::InvalidResponse("response has no text content".into()))?
            .to_string();

        Ok(Completion {
            text,
            usage: response.usage_stats(),
        })
    }
}
