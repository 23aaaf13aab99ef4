//! Shared types for LLM providers

use serde::{Deserialize, Serialize};

/// Role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
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

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Response from an LLM
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

// ============================================================================
// Streaming Types
// ============================================================================

/// Events emitted during streaming responses
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Regular text chunk from the assistant
    TextDelta(String),
    /// Stream completed successfully
    Done,
    /// Error during streaming
    Error(String),
}

/// Callback type for streaming events
///
/// This is called for each chunk as it arrives from the LLM.
/// Implementations should be fast and non-blocking.
pub type StreamCallback = Box<dyn Fn(StreamEvent) + Send + Sync>;

/// Builder for accumulating streaming response
#[derive(Debug, Default)]
pub struct StreamingResponseBuilder {
    /// Accumulated text content
    pub text: String,
    /// Token usage (if provided at end)
    pub usage: Option<TokenUsage>,
}

impl StreamingResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a stream event and accumulate content
    pub fn process(&mut self, event: &StreamEvent) {
        if let StreamEvent::TextDelta(text) = event {
            self.text.push_str(text);
        }
    }

    pub fn build(self) -> LlmResponse {
        LlmResponse {
            text: self.text,
            usage: self.usage,
        }
    }
}
