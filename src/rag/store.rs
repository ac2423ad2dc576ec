//! VectorStore trait — abstract interface over course storage backends.
//!
//! The primary implementation is `SqliteVectorStore` in the `sqlite` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::models::{Course, CourseChunk};
use crate::core::errors::ApiError;

/// Parameters of a content search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    /// Course name as typed by the model; resolved against stored titles.
    pub course_name: Option<String>,
    pub lesson_number: Option<u32>,
    /// Overrides the store's configured result limit.
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// One ranked chunk returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub course_title: String,
    pub lesson_number: Option<u32>,
    pub lesson_link: Option<String>,
    /// `1 - cosine similarity`; lower is closer.
    pub distance: f32,
}

/// Outcome of a search. A resolution failure (for example an unknown course)
/// is carried as `error` rather than as an `Err`, so callers can hand the
/// message to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub error: Option<String>,
}

impl SearchResults {
    pub fn from_hits(hits: Vec<SearchHit>) -> Self {
        Self { hits, error: None }
    }

    pub fn empty_with_error(message: impl Into<String>) -> Self {
        Self {
            hits: Vec::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Stores (or replaces) a course's catalog entry.
    async fn add_course_metadata(&self, course: &Course) -> Result<(), ApiError>;

    /// Embeds and stores content chunks. Any chunks previously stored for
    /// the courses in `chunks` are replaced.
    async fn add_course_content(&self, chunks: &[CourseChunk]) -> Result<(), ApiError>;

    /// Stores a course's catalog entry and content together. Either both are
    /// written or neither is, so a failed ingestion can be retried.
    async fn add_course(&self, course: &Course, chunks: &[CourseChunk]) -> Result<(), ApiError>;

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, ApiError>;

    /// Resolves a possibly partial course name to a stored title.
    async fn resolve_course_name(&self, course_name: &str) -> Result<Option<String>, ApiError>;

    async fn get_course_outline(&self, course_name: &str) -> Result<Option<Course>, ApiError>;

    async fn existing_course_titles(&self) -> Result<Vec<String>, ApiError>;

    async fn course_count(&self) -> Result<usize, ApiError>;

    /// Removes all catalog entries and content.
    async fn clear_all(&self) -> Result<(), ApiError>;
}
