use crate::anthropic::AnthropicClient;
use crate::chunk::TransportEvent;
use crate::error::{LlmError, Result};
use crate::openai::OpenAiClient;
use crate::types::{CompletionRequest, CompletionResponse};
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<TransportEvent>> + Send>>;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn detect(model: &str) -> Self {
        let m = model.to_ascii_lowercase();
        if m.starts_with("claude-") {
            return Self::Anthropic;
        }
        Self::OpenAi
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => f.write_str("openai"),
            Self::Anthropic => f.write_str("anthropic"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(LlmError::Configuration(format!(
                "unknown provider {other:?}; expected openai or anthropic"
            ))),
        }
    }
}

/// A chat completion backend. Streaming calls hand back raw transport events;
/// turning them into a response is the stream session's job.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn provider(&self) -> Provider;

    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream>;

    /// Rough token estimate for `input`; not a real tokenizer.
    fn count_tokens(&self, input: &str) -> usize {
        rough_token_count(input)
    }
}

/// `ceil(words * 1.3)`.
pub fn rough_token_count(input: &str) -> usize {
    let words = input.split_whitespace().count();
    (words as f64 * 1.3).ceil() as usize
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Picked from the model name when absent.
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Full endpoint URL override (proxies, compatible servers).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl ClientConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            provider: None,
            api_key: None,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            base_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn resolved_provider(&self) -> Provider {
        self.provider.unwrap_or_else(|| Provider::detect(&self.model))
    }

    /// Explicit key first, then the provider's environment variable.
    pub fn resolve_api_key(&self, env: impl Fn(&str) -> Option<String>) -> Result<String> {
        let provider = self.resolved_provider();
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| env(provider.api_key_env()).filter(|k| !k.trim().is_empty()))
            .ok_or_else(|| {
                LlmError::Configuration(format!(
                    "{provider} api key is required; set it in the config or as {}",
                    provider.api_key_env()
                ))
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(LlmError::Configuration("model name is required".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(LlmError::Configuration("max_tokens must be > 0".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LlmError::Configuration(format!(
                "temperature must be within 0..=2, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Provider-dispatching client built from a [`ClientConfig`].
#[derive(Clone)]
pub enum LlmClient {
    OpenAi(OpenAiClient),
    Anthropic(AnthropicClient),
}

impl LlmClient {
    /// Validates the config and resolves the credential before any request is made.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_env(config, |key| std::env::var(key).ok())
    }

    pub fn with_env(config: &ClientConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        config.validate()?;
        let api_key = config.resolve_api_key(env)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });

        let provider = config.resolved_provider();
        tracing::debug!(%provider, model = %config.model, "llm client configured");
        Ok(match provider {
            Provider::OpenAi => Self::OpenAi(OpenAiClient::new(http, &api_key, config)),
            Provider::Anthropic => Self::Anthropic(AnthropicClient::new(http, &api_key, config)),
        })
    }

    fn inner(&self) -> &dyn CompletionClient {
        match self {
            Self::OpenAi(c) => c,
            Self::Anthropic(c) => c,
        }
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    fn provider(&self) -> Provider {
        self.inner().provider()
    }

    fn model_name(&self) -> &str {
        self.inner().model_name()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.inner().complete(request).await
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        self.inner().stream(request).await
    }

    fn count_tokens(&self, input: &str) -> usize {
        self.inner().count_tokens(input)
    }
}
