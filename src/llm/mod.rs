//! LLM provider implementations

mod error;
mod openai_compat;
pub mod streaming;
mod types;

pub use error::LlmError;
pub use openai_compat::{create_groq, OpenAiCompatConfig, OpenAiCompatProvider};
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Model identifier requests are sent with
    fn model(&self) -> &str;

    /// Send a chat completion request (non-streaming)
    ///
    /// Generation halts before any of the `stop` sequences.
    async fn chat(&self, messages: &[Message], stop: &[String]) -> Result<LlmResponse>;

    /// Send a streaming chat completion request
    ///
    /// The callback is invoked for each chunk as it arrives from the LLM.
    ///
    /// Default implementation falls back to non-streaming `chat()` and
    /// emits a single TextDelta with the complete response.
    async fn chat_streaming(
        &self,
        messages: &[Message],
        stop: &[String],
        callback: StreamCallback,
    ) -> Result<LlmResponse> {
        let response = self.chat(messages, stop).await?;
        if !response.text.is_empty() {
            callback(StreamEvent::TextDelta(response.text.clone()));
        }
        callback(StreamEvent::Done);
        Ok(response)
    }

    /// Check if this provider supports true streaming
    fn supports_streaming(&self) -> bool {
        false
    }
}

/// Builds a model client for a session credential
///
/// The orchestrator constructs a fresh client every cycle, bound to whatever
/// key the session holds at that moment.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, credential: &str) -> Result<std::sync::Arc<dyn LlmProvider>>;
}

/// Default factory: Groq's OpenAI-compatible endpoint with streaming enabled
pub struct GroqFactory {
    config: crate::config::LlmConfig,
}

impl GroqFactory {
    pub fn new(config: crate::config::LlmConfig) -> Self {
        Self { config }
    }
}

impl ProviderFactory for GroqFactory {
    fn create(&self, credential: &str) -> Result<std::sync::Arc<dyn LlmProvider>> {
        if credential.trim().is_empty() {
            anyhow::bail!("Cannot create a provider without an API key");
        }
        Ok(std::sync::Arc::new(create_groq(credential, &self.config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct FixedProvider;

    #[async_trait]
    impl LlmProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn model(&self) -> &str {
            "fixed-1"
        }

        async fn chat(&self, _messages: &[Message], _stop: &[String]) -> Result<LlmResponse> {
            Ok(LlmResponse::text("Final Answer: 42"))
        }
    }

    #[tokio::test]
    async fn default_streaming_emits_whole_response_once() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let response = FixedProvider
            .chat_streaming(
                &[Message::user("?")],
                &[],
                Box::new(move |e| sink.lock().unwrap().push(e)),
            )
            .await
            .unwrap();

        assert_eq!(response.text, "Final Answer: 42");
        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                StreamEvent::TextDelta("Final Answer: 42".into()),
                StreamEvent::Done
            ]
        );
    }

    #[test]
    fn groq_factory_rejects_blank_credential() {
        let factory = GroqFactory::new(crate::config::LlmConfig::default());
        assert!(factory.create("   ").is_err());
        let provider = factory.create("gsk_live").unwrap();
        assert_eq!(provider.name(), "groq");
        assert_eq!(provider.model(), "llama3-8b-8192");
        assert!(provider.supports_streaming());
    }
}
