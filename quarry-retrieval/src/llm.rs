use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("transient llm failure: {0}")]
    Transient(String),

    #[error("llm endpoint rejected request: {0}")]
    Rejected(String),

    #[error("missing credentials for llm provider")]
    MissingCredentials,
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

/// Knobs passed per completion call.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.1,
        }
    }
}

/// A text-completion provider, chosen at startup by configuration.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

/// Connection settings for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// LLM client speaking the OpenAI chat-completions shape.
pub struct OpenAiCompatLlm {
    http: reqwest::Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatLlm {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingCredentials);
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Transient(e.to_string()))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatLlm {
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> Result<String, LlmError> {
        let url = format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );
        debug!("llm completion via {} ({} bytes)", self.config.model, prompt.len());

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(LlmError::Transient(format!("server error: {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Rejected(format!("{status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Rejected(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Rejected("response carried no choices".to_string()))
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
