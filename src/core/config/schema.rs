use serde::{Deserialize, Serialize};

use super::defaults;

/// Fully resolved application configuration.
///
/// Every field carries a serde default so a partial (or missing) `config.yml`
/// still yields a usable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub rag: RagConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub docs_dir: String,
    pub frontend_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub max_tool_rounds: u32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `hashing` (in-process) or `openai_compatible` (HTTP `/v1/embeddings`).
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_results: usize,
    /// Number of exchanges kept per session.
    pub max_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::HOST.to_string(),
            port: defaults::PORT,
            cors_allowed_origins: vec!["*".to_string()],
            docs_dir: defaults::DOCS_DIR.to_string(),
            frontend_dir: defaults::FRONTEND_DIR.to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: defaults::ANTHROPIC_MODEL.to_string(),
            base_url: defaults::ANTHROPIC_BASE_URL.to_string(),
            max_tokens: defaults::MAX_TOKENS,
            max_tool_rounds: defaults::MAX_TOOL_ROUNDS,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: defaults::EMBEDDING_PROVIDER.to_string(),
            model: defaults::EMBEDDING_MODEL.to_string(),
            base_url: defaults::EMBEDDING_BASE_URL.to_string(),
            api_key: None,
            dimension: defaults::EMBEDDING_DIMENSION,
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            chunk_overlap: defaults::CHUNK_OVERLAP,
            max_results: defaults::MAX_RESULTS,
            max_history: defaults::MAX_HISTORY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
