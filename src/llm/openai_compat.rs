//! Generic OpenAI-compatible LLM provider
//!
//! Speaks the `/chat/completions` wire format, which Groq (and several other
//! hosted services) expose. Streaming uses Server-Sent Events.
//!
//! SECURITY: Credentials are only sent to the configured endpoint.

use super::{
    streaming::{SseDecoder, DONE_MARKER},
    LlmError, LlmProvider, LlmResponse, Message, StreamCallback, StreamEvent,
    StreamingResponseBuilder, TokenUsage,
};
use crate::config::LlmConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Configuration Types
// ============================================================================

/// Configuration for an OpenAI-compatible provider
#[derive(Clone)]
pub struct OpenAiCompatConfig {
    /// Provider name (e.g., "groq")
    pub name: String,
    /// Full URL of the chat completions endpoint
    pub base_url: String,
    /// Bearer token sent in the Authorization header
    pub api_key: String,
    pub default_model: String,
    pub max_tokens: usize,
    pub custom_headers: Vec<(String, String)>,
    pub supports_streaming: bool,
    pub temperature: Option<f32>,
    /// Longest silence tolerated between two stream chunks
    pub stream_timeout: Duration,
}

impl std::fmt::Debug for OpenAiCompatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("default_model", &self.default_model)
            .field("max_tokens", &self.max_tokens)
            .field("supports_streaming", &self.supports_streaming)
            .finish()
    }
}

impl OpenAiCompatConfig {
    /// Create a new configuration with minimal required fields
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            default_model: String::new(),
            max_tokens: 1024,
            custom_headers: Vec::new(),
            supports_streaming: true,
            temperature: None,
            stream_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_streaming(mut self, supported: bool) -> Self {
        self.supports_streaming = supported;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Generic OpenAI-compatible provider
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    config: OpenAiCompatConfig,
    model: String,
}

impl OpenAiCompatProvider {
    pub fn new(config: OpenAiCompatConfig) -> Self {
        let model = config.default_model.clone();
        Self {
            client: reqwest::Client::new(),
            config,
            model,
        }
    }

    fn build_request(&self, messages: &[Message], stop: &[String], stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: Some(self.config.max_tokens),
            temperature: self.config.temperature,
            stop: if stop.is_empty() {
                None
            } else {
                Some(stop.to_vec())
            },
            stream: if stream { Some(true) } else { None },
        }
    }

    /// Build request with authorization headers
    fn build_http_request(&self, body: &ChatRequest) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.config.base_url)
            .header("Content-Type", "application/json")
            .bearer_auth(&self.config.api_key);

        for (name, value) in &self.config.custom_headers {
            req = req.header(name, value);
        }

        req.json(body)
    }

    async fn send(&self, body: &ChatRequest) -> Result<reqwest::Response> {
        let response = self
            .build_http_request(body)
            .send()
            .await
            .map_err(LlmError::from_network_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_http_status(status, error_text).into());
        }
        Ok(response)
    }

    fn parse_response(response: ChatResponse) -> LlmResponse {
        LlmResponse {
            text: response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .unwrap_or_default(),
            usage: response.usage.map(TokenUsage::from),
        }
    }

    async fn chat_impl(&self, messages: &[Message], stop: &[String]) -> Result<LlmResponse> {
        tracing::debug!(
            target: "llm",
            provider = self.config.name,
            model = self.model,
            messages = messages.len(),
            "Sending chat request"
        );

        let request = self.build_request(messages, stop, false);
        let response = self.send(&request).await?;
        let api_response: ChatResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} API response", self.config.name))?;

        Ok(Self::parse_response(api_response))
    }

    /// Apply one decoded SSE payload; returns false once the stream signals completion
    fn apply_payload(
        payload: &str,
        builder: &mut StreamingResponseBuilder,
        callback: &StreamCallback,
    ) -> bool {
        if payload == DONE_MARKER {
            return false;
        }

        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => {
                if let Some(choice) = chunk.choices.first() {
                    if let Some(content) = choice.delta.content.as_deref() {
                        if !content.is_empty() {
                            let event = StreamEvent::TextDelta(content.to_string());
                            builder.process(&event);
                            callback(event);
                        }
                    }
                }
                // Groq reports usage under `x_groq`, OpenAI at the top level
                let usage = chunk
                    .usage
                    .or_else(|| chunk.x_groq.and_then(|extra| extra.usage));
                if let Some(usage) = usage {
                    builder.usage = Some(usage.into());
                }
            }
            Err(e) => {
                tracing::debug!(target: "llm", "Skipping unparseable stream payload: {}", e);
            }
        }
        true
    }

    async fn chat_streaming_impl(
        &self,
        messages: &[Message],
        stop: &[String],
        callback: StreamCallback,
    ) -> Result<LlmResponse> {
        use futures::StreamExt;
        use tokio::time::timeout;

        tracing::debug!(
            target: "llm",
            provider = self.config.name,
            model = self.model,
            messages = messages.len(),
            "Sending streaming request"
        );

        let request = self.build_request(messages, stop, true);
        let response = match self.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                callback(StreamEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        let mut builder = StreamingResponseBuilder::new();
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut finished = false;

        while !finished {
            let chunk = match timeout(self.config.stream_timeout, stream.next()).await {
                Ok(Some(chunk)) => chunk.map_err(LlmError::from_network_error)?,
                Ok(None) => break,
                Err(_) => {
                    return Err(LlmError::Network(format!(
                        "Stream timeout - no response from {} for {} seconds",
                        self.config.name,
                        self.config.stream_timeout.as_secs()
                    ))
                    .into());
                }
            };

            for payload in decoder.push(&chunk) {
                if !Self::apply_payload(&payload, &mut builder, &callback) {
                    finished = true;
                }
            }
        }

        for payload in decoder.finish() {
            Self::apply_payload(&payload, &mut builder, &callback);
        }

        callback(StreamEvent::Done);
        Ok(builder.build())
    }
}

// ============================================================================
// LlmProvider Implementation
// ============================================================================

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[Message], stop: &[String]) -> Result<LlmResponse> {
        self.chat_impl(messages, stop).await
    }

    fn supports_streaming(&self) -> bool {
        self.config.supports_streaming
    }

    async fn chat_streaming(
        &self,
        messages: &[Message],
        stop: &[String],
        callback: StreamCallback,
    ) -> Result<LlmResponse> {
        if !self.config.supports_streaming {
            let response = self.chat_impl(messages, stop).await?;
            callback(StreamEvent::TextDelta(response.text.clone()));
            callback(StreamEvent::Done);
            return Ok(response);
        }
        self.chat_streaming_impl(messages, stop, callback).await
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<WireUsage> for TokenUsage {
    fn from(u: WireUsage) -> Self {
        TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
    x_groq: Option<GroqExtra>,
}

#[derive(Debug, Deserialize)]
struct GroqExtra {
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Create a Groq provider bound to `api_key`, using the configured endpoint and model
pub fn create_groq(api_key: impl Into<String>, config: &LlmConfig) -> OpenAiCompatProvider {
    OpenAiCompatProvider::new(
        OpenAiCompatConfig::new("groq", config.base_url.clone(), api_key)
            .with_model(config.model.clone())
            .with_max_tokens(config.max_tokens)
            .with_streaming(config.streaming)
            .with_temperature(config.temperature)
            .with_stream_timeout(Duration::from_secs(config.stream_timeout_secs)),
    )
}
