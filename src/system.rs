//! Wires ingestion, retrieval, tools, generation and sessions together.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::core::config::AppConfig;
use crate::core::errors::ApiError;
use crate::history::SessionManager;
use crate::llm::{AIGenerator, LlmProvider};
use crate::rag::{ChunkingConfig, Course, DocumentProcessor, VectorStore};
use crate::tools::{CourseOutlineTool, CourseSearchTool, Source, ToolRegistry};

const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "md"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseAnalytics {
    pub total_courses: usize,
    pub course_titles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub courses: usize,
    pub chunks: usize,
}

pub struct RagSystem {
    processor: DocumentProcessor,
    store: Arc<dyn VectorStore>,
    generator: AIGenerator,
    tools: ToolRegistry,
    sessions: SessionManager,
}

impl RagSystem {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        let processor = DocumentProcessor::new(ChunkingConfig {
            chunk_size: config.rag.chunk_size,
            chunk_overlap: config.rag.chunk_overlap,
        });

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CourseSearchTool::new(store.clone())));
        tools.register(Arc::new(CourseOutlineTool::new(store.clone())));

        Self {
            processor,
            store,
            generator: AIGenerator::new(provider, &config.llm),
            tools,
            sessions: SessionManager::new(config.rag.max_history),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Answers a user query, returning the answer and the sources the tools
    /// cited while producing it.
    pub async fn query(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<(String, Vec<Source>), ApiError> {
        let prompt = format!("Answer this question about course materials: {}", query);

        let history = match session_id {
            Some(id) => self.sessions.get_conversation_history(id).await,
            None => None,
        };

        let mut run = self.tools.start_run();
        let answer = self
            .generator
            .generate_response(&prompt, history.as_deref(), Some(&mut run))
            .await?;
        let sources = run.into_sources();

        if let Some(id) = session_id {
            self.sessions.add_exchange(id, query, &answer).await;
        }

        tracing::info!(sources = sources.len(), "Answered query");
        Ok((answer, sources))
    }

    /// Parses one document and stores its catalog entry and chunks.
    pub async fn add_course_document(&self, path: &Path) -> Result<(Course, usize), ApiError> {
        let (course, chunks) = self
            .processor
            .process_course_document(path)
            .map_err(|e| ApiError::BadRequest(format!("{:#}", e)))?;

        self.store.add_course(&course, &chunks).await?;

        tracing::info!(
            "Added course '{}' ({} lessons, {} chunks)",
            course.title,
            course.lessons.len(),
            chunks.len()
        );
        Ok((course, chunks.len()))
    }

    /// Ingests every supported document in `dir`. Courses whose title is
    /// already stored are skipped, as are files that fail to parse or store.
    pub async fn add_course_folder(
        &self,
        dir: &Path,
        clear_existing: bool,
    ) -> Result<IngestSummary, ApiError> {
        let mut summary = IngestSummary::default();

        if !dir.is_dir() {
            tracing::warn!("Course folder {} does not exist", dir.display());
            return Ok(summary);
        }

        if clear_existing {
            tracing::info!("Clearing existing course data");
            self.store.clear_all().await?;
        }

        let mut existing: HashSet<String> =
            self.store.existing_course_titles().await?.into_iter().collect();

        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .map_err(ApiError::internal)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_supported(path))
            .collect();
        entries.sort();

        for path in entries {
            let (course, chunks) = match self.processor.process_course_document(&path) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!("Skipping {}: {:#}", path.display(), err);
                    continue;
                }
            };

            if chunks.is_empty() && course.lessons.is_empty() {
                tracing::warn!("Skipping {}: no course content", path.display());
                continue;
            }

            if existing.contains(&course.title) {
                tracing::info!("Course already exists: {}", course.title);
                continue;
            }

            if let Err(err) = self.store.add_course(&course, &chunks).await {
                tracing::warn!("Skipping {}: failed to store course: {}", path.display(), err);
                continue;
            }
            tracing::info!("Added new course: {} ({} chunks)", course.title, chunks.len());

            summary.courses += 1;
            summary.chunks += chunks.len();
            existing.insert(course.title);
        }

        Ok(summary)
    }

    pub async fn course_analytics(&self) -> Result<CourseAnalytics, ApiError> {
        Ok(CourseAnalytics {
            total_courses: self.store.course_count().await?,
            course_titles: self.store.existing_course_titles().await?,
        })
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
