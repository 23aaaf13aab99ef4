//! Lookup tools the agent can call
//!
//! Each tool takes a free-text query and returns bounded text. The registry is
//! the lookup table the agent loop consults by tool name.

mod arxiv;
mod wikipedia;

pub use arxiv::ArxivQueryTool;
pub use wikipedia::WikipediaQueryTool;

use crate::config::ToolsConfig;
use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Longest query forwarded to a search backend, in characters
pub const MAX_QUERY_CHARS: usize = 300;

/// Result of executing a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// Name and usage description shown to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
}

/// Caps applied to every search result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    /// Documents requested from the backend and kept in the output
    pub top_k_results: usize,
    /// Characters of the joined output kept
    pub doc_content_chars_max: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            top_k_results: 1,
            doc_content_chars_max: 200,
        }
    }
}

impl SearchLimits {
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            top_k_results: config.top_k_results.max(1),
            doc_content_chars_max: config.doc_content_chars_max,
        }
    }

    /// Keep at most `top_k_results` documents, join them, cut to the character cap
    pub fn apply(&self, documents: &[String]) -> String {
        let joined = documents
            .iter()
            .take(self.top_k_results)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n");
        truncate_chars(&joined, self.doc_content_chars_max)
    }
}

/// Truncate to at most `max_chars` characters (not bytes)
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Trait for agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// When to use the tool and what input it expects, written for the model
    fn description(&self) -> &str;

    /// Run the tool on the model-provided input
    async fn execute(&self, input: &str) -> Result<ToolResult>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
        }
    }
}

/// Registry of available tools
pub struct ToolRegistry {
    // BTreeMap keeps prompt rendering order stable
    tools: BTreeMap<String, Arc<dyn Tool>>,
    tool_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            tool_timeout: Duration::from_secs(30),
        }
    }

    /// Registry with the arXiv and Wikipedia tools, configured from `config`
    pub fn with_defaults(config: &ToolsConfig) -> Result<Self> {
        let limits = SearchLimits::from_config(config);
        let client = reqwest::Client::builder()
            .user_agent(concat!("scout/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let mut registry = Self::new();
        registry.set_tool_timeout(Duration::from_secs(config.timeout_secs));
        registry.register(Arc::new(ArxivQueryTool::new(
            client.clone(),
            &config.arxiv_url,
            limits,
        )?));
        registry.register(Arc::new(WikipediaQueryTool::new(
            client,
            &config.wikipedia_url,
            limits,
        )?));

        tracing::debug!("Tool registry created with tools: {:?}", registry.names());
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn set_tool_timeout(&mut self, timeout: Duration) {
        self.tool_timeout = timeout;
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool by name
    ///
    /// Unknown names, errors, timeouts and panics all come back as a failed
    /// `ToolResult` whose output the agent sees as its observation.
    pub async fn execute(&self, name: &str, input: &str) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::error(format!(
                "{} is not a valid tool, try one of [{}].",
                name,
                self.names().join(", ")
            ));
        };

        let started = Instant::now();
        let outcome = timeout(
            self.tool_timeout,
            AssertUnwindSafe(tool.execute(input)).catch_unwind(),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(Ok(result))) => {
                tracing::debug!(tool = %name, elapsed_ms, success = result.success, "Tool finished");
                result
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(tool = %name, elapsed_ms, "Tool failed: {:#}", e);
                ToolResult::error(format!("{} exception: {:#}", tool_label(name), e))
            }
            Ok(Err(panic_info)) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                tracing::error!(tool = %name, "Tool panicked: {}", panic_msg);
                ToolResult::error(format!("Tool '{}' crashed: {}", name, panic_msg))
            }
            Err(_) => {
                tracing::warn!(tool = %name, elapsed_ms, "Tool timed out");
                ToolResult::error(format!(
                    "Tool '{}' timed out after {} seconds",
                    name,
                    self.tool_timeout.as_secs()
                ))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn tool_label(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Repeats the input"
        }
        async fn execute(&self, input: &str) -> Result<ToolResult> {
            Ok(ToolResult::success(input))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "wikipedia"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        async fn execute(&self, _input: &str) -> Result<ToolResult> {
            anyhow::bail!("connection reset")
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "Panics"
        }
        async fn execute(&self, _input: &str) -> Result<ToolResult> {
            panic!("index out of bounds")
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never answers in time"
        }
        async fn execute(&self, _input: &str) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::success("late"))
        }
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 200), "short");
        assert_eq!(truncate_chars("", 3), "");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn limits_keep_first_document_only() {
        let limits = SearchLimits::default();
        let docs = vec!["Page: Paris".to_string(), "Page: Lyon".to_string()];
        assert_eq!(limits.apply(&docs), "Page: Paris");
    }

    #[test]
    fn limits_join_multiple_documents_when_allowed() {
        let limits = SearchLimits {
            top_k_results: 2,
            doc_content_chars_max: 1000,
        };
        let docs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(limits.apply(&docs), "a\n\nb");
    }

    #[test]
    fn limits_from_config_never_request_zero_documents() {
        let config = ToolsConfig {
            top_k_results: 0,
            ..ToolsConfig::default()
        };
        assert_eq!(SearchLimits::from_config(&config).top_k_results, 1);
    }

    proptest! {
        #[test]
        fn applied_limits_never_exceed_the_character_cap(
            docs in proptest::collection::vec(".{0,400}", 0..5),
            cap in 0usize..300,
        ) {
            let limits = SearchLimits { top_k_results: 1, doc_content_chars_max: cap };
            let out = limits.apply(&docs);
            prop_assert!(out.chars().count() <= cap);
            if let Some(first) = docs.first() {
                prop_assert!(first.starts_with(&out));
            }
        }
    }

    #[tokio::test]
    async fn unknown_tool_lists_valid_names() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let result = registry.execute("google", "x").await;
        assert!(!result.success);
        assert_eq!(result.output, "google is not a valid tool, try one of [echo].");
    }

    #[tokio::test]
    async fn tool_error_becomes_observation() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        let result = registry.execute("wikipedia", "Paris").await;
        assert!(!result.success);
        assert_eq!(result.output, "Wikipedia exception: connection reset");
    }

    #[tokio::test]
    async fn tool_panic_is_contained() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PanickingTool));
        let result = registry.execute("boom", "").await;
        assert!(!result.success);
        assert!(result.output.contains("index out of bounds"));
    }

    #[tokio::test]
    async fn tool_timeout_is_reported() {
        let mut registry = ToolRegistry::new();
        registry.set_tool_timeout(Duration::from_millis(20));
        registry.register(Arc::new(SlowTool));
        let result = registry.execute("slow", "").await;
        assert!(!result.success);
        assert!(result.output.contains("timed out"));
    }

    #[test]
    fn default_registry_has_both_lookups() {
        let registry = ToolRegistry::with_defaults(&ToolsConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["arxiv", "wikipedia"]);
        let defs = registry.definitions();
        assert!(defs.iter().all(|d| !d.description.is_empty()));
    }
}
