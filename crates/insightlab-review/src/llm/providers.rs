//! LLM API Providers
//!
//! Concrete clients for OpenAI, Anthropic, Gemini and local
//! (OpenAI-compatible) endpoints.

use super::*;
use reqwest::Client;
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

/// LLM configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Gemini,
    Local,
}

const DEFAULT_GEMINI_MODEL: &str = "models/gemini-2.0-flash-exp";

impl LLMConfig {
    /// Load from environment variables.
    ///
    /// Providers are tried in order: OpenAI, Anthropic, Gemini, local.
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        if let Some(key) = var("OPENAI_API_KEY") {
            let mut config = Self::openai(
                &key,
                &var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            );
            config.base_url = var("OPENAI_BASE_URL");
            return Ok(config);
        }

        if let Some(key) = var("ANTHROPIC_API_KEY") {
            return Ok(Self::anthropic(
                &key,
                &var("ANTHROPIC_MODEL").unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string()),
            ));
        }

        if let Some(key) = var("GEMINI_API_KEY") {
            return Ok(Self::gemini(
                &key,
                &var("CHAT_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            ));
        }

        if let Some(url) = var("LOCAL_LLM_URL") {
            return Ok(Self::local(
                &url,
                &var("LOCAL_LLM_MODEL").unwrap_or_else(|| "default".to_string()),
            ));
        }

        Err(ConfigError::NoProviderConfigured)
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    /// Gemini model names are qualified with `models/` unless already
    /// qualified (`models/...` or `tunedModels/...`).
    pub fn gemini(api_key: &str, model: &str) -> Self {
        let model = if model.starts_with("models/") || model.starts_with("tunedModels/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        Self {
            provider: Provider::Gemini,
            api_key: api_key.to_string(),
            model,
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.trim_end_matches('/').to_string()),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No LLM provider configured. Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, or LOCAL_LLM_URL")]
    NoProviderConfigured,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "falling back to default HTTP client");
            Client::new()
        })
}

fn openai_messages(request: &CompletionRequest) -> Vec<serde_json::Value> {
    request
        .messages
        .iter()
        .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
        .collect()
}

async fn error_body(response: reqwest::Response, what: &str) -> LLMError {
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    LLMError::Api(format!("{what} ({status}): {error_text}"))
}

// ============================================================================
// OpenAI Provider
// ============================================================================

pub struct OpenAIClient {
    client: Client,
    config: LLMConfig,
}

impl OpenAIClient {
    pub fn new(config: LLMConfig) -> Self {
        Self {
            client: http_client(config.timeout_secs),
            config,
        }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = format!("{}/chat/completions", self.base_url());

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": openai_messages(request),
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if request.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if response.status() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(LLMError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }
        if !response.status().is_success() {
            return Err(error_body(response, "API error").await);
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let finish_reason = match data["choices"][0]["finish_reason"].as_str() {
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            usage: Usage {
                prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
                completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
            },
            model: self.config.model.clone(),
        })
    }

    /// OpenAI-compatible `/embeddings`.
    pub async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError> {
        let url = format!("{}/embeddings", self.base_url());
        let body = serde_json::json!({
            "model": model,
            "input": texts,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_body(response, "Embedding error").await);
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let embeddings: Vec<Vec<f32>> = data["data"]
            .as_array()
            .ok_or_else(|| LLMError::InvalidResponse("Missing data array".to_string()))?
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        if embeddings.len() != texts.len() {
            return Err(LLMError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

// ============================================================================
// Anthropic Provider
// ============================================================================

pub struct AnthropicClient {
    client: Client,
    config: LLMConfig,
}

impl AnthropicClient {
    pub fn new(config: LLMConfig) -> Self {
        Self {
            client: http_client(config.timeout_secs),
            config,
        }
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = "https://api.anthropic.com/v1/messages";

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| !matches!(m.role, Role::System))
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(4096),
        });
        if let Some(sys) = request.system_prompt() {
            body["system"] = serde_json::json!(sys);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if response.status() == 429 {
            return Err(LLMError::RateLimited {
                retry_after_ms: 60_000,
            });
        }
        if !response.status().is_success() {
            return Err(error_body(response, "API error").await);
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["content"][0]["text"].as_str().unwrap_or("").to_string();
        let finish_reason = match data["stop_reason"].as_str() {
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            usage: Usage {
                prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
                completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
            },
            model: self.config.model.clone(),
        })
    }
}

// ============================================================================
// Gemini Provider
// ============================================================================

pub struct GeminiClient {
    client: Client,
    config: LLMConfig,
}

impl GeminiClient {
    pub fn new(config: LLMConfig) -> Self {
        Self {
            client: http_client(config.timeout_secs),
            config,
        }
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = format!(
            "{}/{}:generateContent",
            self.config
                .base_url
                .as_deref()
                .unwrap_or("https://generativelanguage.googleapis.com/v1beta"),
            self.config.model
        );

        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| !matches!(m.role, Role::System))
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                serde_json::json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature.unwrap_or(0.2),
                "topP": 0.9,
            },
        });
        if let Some(sys) = request.system_prompt() {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": sys}]});
        }
        if request.json_mode {
            body["generationConfig"]["responseMimeType"] = serde_json::json!("application/json");
        }

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if response.status() == 429 {
            return Err(LLMError::RateLimited {
                retry_after_ms: 60_000,
            });
        }
        if !response.status().is_success() {
            return Err(error_body(response, "API error").await);
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let candidate = &data["candidates"][0];
        if candidate.is_null() {
            return Err(LLMError::InvalidResponse(
                "No candidates returned from Gemini".to_string(),
            ));
        }
        let content: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
            .unwrap_or_default();
        let finish_reason = match candidate["finishReason"].as_str() {
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            usage: Usage {
                prompt_tokens: data["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0)
                    as usize,
                completion_tokens: data["usageMetadata"]["candidatesTokenCount"]
                    .as_u64()
                    .unwrap_or(0) as usize,
            },
            model: self.config.model.clone(),
        })
    }
}

// ============================================================================
// Local Provider (Ollama, vLLM, etc.)
// ============================================================================

pub struct LocalClient {
    client: Client,
    config: LLMConfig,
}

impl LocalClient {
    pub fn new(config: LLMConfig) -> Self {
        Self {
            client: http_client(config.timeout_secs),
            config,
        }
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| LLMError::Api("No base URL configured".to_string()))?;

        // OpenAI-compatible API (vLLM, Ollama in OpenAI mode)
        let url = format!("{base_url}/v1/chat/completions");

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": openai_messages(request),
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_body(response, "Local API error").await);
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            model: self.config.model.clone(),
        })
    }
}

// ============================================================================
// Unified Client
// ============================================================================

/// Unified LLM client that dispatches to the configured provider
pub enum UnifiedClient {
    OpenAI(OpenAIClient),
    Anthropic(AnthropicClient),
    Gemini(GeminiClient),
    Local(LocalClient),
}

impl UnifiedClient {
    pub fn from_config(config: LLMConfig) -> Self {
        match config.provider {
            Provider::OpenAI => Self::OpenAI(OpenAIClient::new(config)),
            Provider::Anthropic => Self::Anthropic(AnthropicClient::new(config)),
            Provider::Gemini => Self::Gemini(GeminiClient::new(config)),
            Provider::Local => Self::Local(LocalClient::new(config)),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::from_config(LLMConfig::from_env()?))
    }

    pub fn model_name(&self) -> &str {
        match self {
            Self::OpenAI(c) => &c.config.model,
            Self::Anthropic(c) => &c.config.model,
            Self::Gemini(c) => &c.config.model,
            Self::Local(c) => &c.config.model,
        }
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        match self {
            Self::OpenAI(c) => c.complete(request).await,
            Self::Anthropic(c) => c.complete(request).await,
            Self::Gemini(c) => c.complete(request).await,
            Self::Local(c) => c.complete(request).await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
