//! Course ingestion and retrieval.
//!
//! - `DocumentProcessor`: parses course documents into a `Course` and chunks
//! - `VectorStore`: stores chunks and answers similarity searches
//! - `Embedder`: turns text into vectors for the store

mod document;
mod embedding;
mod models;
mod sqlite;
mod store;

pub use document::{ChunkingConfig, DocumentProcessor};
pub use embedding::{build_embedder, Embedder, HashingEmbedder, HttpEmbedder};
pub use models::{Course, CourseChunk, Lesson};
pub use sqlite::SqliteVectorStore;
pub use store::{SearchHit, SearchQuery, SearchResults, VectorStore};

#[cfg(test)]
pub(crate) use sqlite::tests::FlakyEmbedder;
