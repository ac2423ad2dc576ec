use std::sync::Arc;

use crate::core::config::{AppConfig, AppPaths, ConfigService};
use crate::llm::{AnthropicProvider, LlmProvider};
use crate::rag::{build_embedder, SqliteVectorStore, VectorStore};
use crate::system::RagSystem;

pub mod error;

use error::InitializationError;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: Arc<AppConfig>,
    pub rag: Arc<RagSystem>,
}

impl AppState {
    /// Loads configuration for `paths`.
    pub fn load_config(paths: Arc<AppPaths>) -> Result<AppConfig, InitializationError> {
        ConfigService::new(paths)
            .load_config()
            .map_err(|e| InitializationError::Config(e.into()))
    }

    /// Builds the embedder, vector store and LLM provider described by
    /// `config`.
    pub async fn initialize(
        paths: Arc<AppPaths>,
        config: AppConfig,
    ) -> Result<Arc<Self>, InitializationError> {
        let embedder =
            build_embedder(&config.embedding).map_err(|e| InitializationError::Embedder(e.into()))?;
        tracing::info!("Using embedder {}", embedder.name());

        if let Some(parent) = paths.db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| InitializationError::VectorStore(e.into()))?;
        }
        let store = SqliteVectorStore::with_path(
            paths.db_path.clone(),
            embedder,
            config.rag.max_results,
        )
        .await
        .map_err(|e| InitializationError::VectorStore(e.into()))?;

        let provider =
            AnthropicProvider::new(&config.llm).map_err(|e| InitializationError::Llm(e.into()))?;

        Ok(Self::from_parts(paths, config, Arc::new(store), Arc::new(provider)))
    }

    pub fn from_parts(
        paths: Arc<AppPaths>,
        config: AppConfig,
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn LlmProvider>,
    ) -> Arc<Self> {
        let rag = Arc::new(RagSystem::new(&config, store, provider));
        Arc::new(Self {
            paths,
            config: Arc::new(config),
            rag,
        })
    }

    /// Loads the configured docs folder. Failures are logged, not fatal.
    pub async fn ingest_docs(&self) {
        let docs_dir = self.paths.resolve(&self.config.server.docs_dir);
        tracing::info!("Loading initial documents from {}", docs_dir.display());

        match self.rag.add_course_folder(&docs_dir, false).await {
            Ok(summary) => tracing::info!(
                "Loaded {} courses with {} chunks",
                summary.courses,
                summary.chunks
            ),
            Err(err) => tracing::warn!("Failed to load initial documents: {}", err),
        }
    }
}
