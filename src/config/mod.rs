//! Configuration management for scout

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Model identifier used for every chat cycle unless the config overrides it
pub const DEFAULT_MODEL: &str = "llama3-8b-8192";

/// Groq's OpenAI-compatible chat completions endpoint
pub const DEFAULT_GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Environment variable consulted by the terminal front-end when no key is passed
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: usize,
    pub streaming: bool,
    /// Seconds without a stream chunk before the request is abandoned
    pub stream_timeout_secs: u64,
    pub temperature: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GROQ_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            streaming: true,
            stream_timeout_secs: 60,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Browser sessions untouched for this long are dropped
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
            session_idle_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: usize,
    /// Feed malformed model output back as an observation instead of failing the cycle
    pub handle_parsing_errors: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            handle_parsing_errors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub top_k_results: usize,
    pub doc_content_chars_max: usize,
    pub timeout_secs: u64,
    pub arxiv_url: String,
    pub wikipedia_url: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            top_k_results: 1,
            doc_content_chars_max: 200,
            timeout_secs: 30,
            arxiv_url: "https://export.arxiv.org/api/query".to_string(),
            wikipedia_url: "https://en.wikipedia.org/w/api.php".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, falling back to defaults if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "scout") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
