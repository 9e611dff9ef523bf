//! Generative-model access
//!
//! Every stage that talks to a model goes through [`StructuredLlm`]:
//! a system/user prompt pair in, one JSON value out. Provider details
//! (HTTP shapes, auth headers, model names) stay in [`providers`].
//!
//! Failure is ordinary here. Callers log it and degrade (a `Weak` verdict,
//! a deterministic fallback draft, an empty cluster list); nothing in this
//! module is allowed to abort a run.

pub mod providers;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

pub use providers::{ConfigError, LLMConfig, Provider, UnifiedClient};

// ============================================================================
// Request / response shapes
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Ask the provider for JSON output where it supports a JSON mode.
    pub json_mode: bool,
}

impl CompletionRequest {
    /// System + user prompt at the low temperature used for all structured calls.
    pub fn structured(system: &str, user: &str) -> Self {
        Self {
            messages: vec![
                Message {
                    role: Role::System,
                    content: system.trim().to_string(),
                },
                Message {
                    role: Role::User,
                    content: user.trim().to_string(),
                },
            ],
            max_tokens: None,
            temperature: Some(0.2),
            json_mode: true,
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| matches!(m.role, Role::System))
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub model: String,
}

#[derive(Debug, Clone, Copy)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Parsing error: {0}")]
    ParseError(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("no provider configured")]
    NotConfigured,
}

// ============================================================================
// Structured call interface
// ============================================================================

/// The one model operation the pipeline depends on.
#[async_trait]
pub trait StructuredLlm: Send + Sync {
    /// Returns the parsed JSON payload of the model's answer.
    async fn call_structured(&self, system: &str, user: &str) -> Result<Value, LLMError>;

    /// Short label for logs and trace events.
    fn name(&self) -> String {
        "llm".to_string()
    }
}

fn json_block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)(\{.*\}|\[.*\])").expect("static JSON regex"))
}

/// Parse the model text as JSON, or the first `{...}` / `[...]` block in it.
pub fn extract_json_block(text: &str) -> Result<Value, LLMError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(LLMError::InvalidResponse("empty model response".to_string()));
    }
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }
    let block = json_block_pattern()
        .find(text)
        .ok_or_else(|| LLMError::ParseError("No JSON block found in model response".to_string()))?;
    serde_json::from_str(block.as_str()).map_err(|e| LLMError::ParseError(e.to_string()))
}

#[async_trait]
impl StructuredLlm for UnifiedClient {
    async fn call_structured(&self, system: &str, user: &str) -> Result<Value, LLMError> {
        let response = self
            .complete(&CompletionRequest::structured(system, user))
            .await?;
        tracing::debug!(
            model = %response.model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "model call complete"
        );
        if matches!(response.finish_reason, FinishReason::ContentFilter) {
            return Err(LLMError::InvalidResponse("response blocked by content filter".to_string()));
        }
        extract_json_block(&response.content)
    }

    fn name(&self) -> String {
        self.model_name().to_string()
    }
}

/// Stand-in when no provider is configured. Every call fails, so every
/// consumer takes its degraded path.
pub struct DisabledLlm;

#[async_trait]
impl StructuredLlm for DisabledLlm {
    async fn call_structured(&self, _system: &str, _user: &str) -> Result<Value, LLMError> {
        Err(LLMError::NotConfigured)
    }

    fn name(&self) -> String {
        "disabled".to_string()
    }
}

// ============================================================================
// Mock
// ============================================================================

/// Scripted model for testing. Replies cycle; every call is counted.
pub struct MockLlm {
    responses: Vec<Result<Value, String>>,
    calls: AtomicUsize,
}

impl MockLlm {
    pub fn new(responses: Vec<Result<Value, String>>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(response: Value) -> Self {
        Self::new(vec![Ok(response)])
    }

    pub fn failing(message: &str) -> Self {
        Self::new(vec![Err(message.to_string())])
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StructuredLlm for MockLlm {
    async fn call_structured(&self, _system: &str, _user: &str) -> Result<Value, LLMError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.responses.is_empty() {
            return Err(LLMError::InvalidResponse("mock has no responses".to_string()));
        }
        match &self.responses[idx % self.responses.len()] {
            Ok(value) => Ok(value.clone()),
            Err(message) => Err(LLMError::Api(message.clone())),
        }
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}
