//! SQLite-backed vector store implementation.
//!
//! In-process store using SQLite for the course catalog and chunk metadata and
//! brute-force cosine similarity for ranking.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::embedding::Embedder;
use super::models::{Course, CourseChunk, Lesson};
use super::store::{SearchHit, SearchQuery, SearchResults, VectorStore};
use crate::core::errors::ApiError;

pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    max_results: usize,
}

impl SqliteVectorStore {
    pub async fn with_path(
        db_path: PathBuf,
        embedder: Arc<dyn Embedder>,
        max_results: usize,
    ) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self {
            pool,
            embedder,
            max_results: max_results.max(1),
        };
        store.init_schema().await?;
        store.ensure_embedding_model().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS course_catalog (
                title TEXT PRIMARY KEY,
                instructor TEXT,
                course_link TEXT,
                lessons TEXT NOT NULL DEFAULT '[]',
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS course_content (
                chunk_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                course_title TEXT NOT NULL,
                lesson_number INTEGER,
                chunk_index INTEGER NOT NULL,
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_content_course ON course_content(course_title, lesson_number)",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Vectors from a different embedding model are not comparable, so a
    /// model change wipes stored data before it can be mixed.
    async fn ensure_embedding_model(&self) -> Result<(), ApiError> {
        let current = self.embedder.name().to_string();
        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'embedding_model'")
                .fetch_optional(&self.pool)
                .await
                .map_err(ApiError::internal)?;

        if stored.as_deref() == Some(current.as_str()) {
            return Ok(());
        }

        if let Some(previous) = stored {
            tracing::warn!(
                "Embedding model changed from {} to {}; clearing stored courses",
                previous,
                current
            );
            self.clear_all().await?;
        }

        sqlx::query(
            "INSERT OR REPLACE INTO store_meta (key, value, updated_at)
             VALUES ('embedding_model', ?1, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
        )
        .bind(&current)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Internal("Embedder returned no vector".to_string()))
    }

    async fn embed_chunks(&self, chunks: &[CourseChunk]) -> Result<Vec<Vec<f32>>, ApiError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed(&contents).await?;
        if embeddings.len() != chunks.len() {
            return Err(ApiError::Internal(format!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }
        Ok(embeddings)
    }

    async fn upsert_catalog(
        tx: &mut Transaction<'_, Sqlite>,
        course: &Course,
        embedding: &[f32],
    ) -> Result<(), ApiError> {
        let lessons = serde_json::to_string(&course.lessons).map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT OR REPLACE INTO course_catalog (title, instructor, course_link, lessons, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&course.title)
        .bind(&course.instructor)
        .bind(&course.course_link)
        .bind(&lessons)
        .bind(Self::serialize_embedding(embedding))
        .execute(&mut **tx)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Deletes existing content for `titles`, then inserts `chunks`.
    async fn replace_content<'t>(
        tx: &mut Transaction<'_, Sqlite>,
        titles: impl IntoIterator<Item = &'t str>,
        chunks: &[CourseChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), ApiError> {
        for title in titles {
            sqlx::query("DELETE FROM course_content WHERE course_title = ?1")
                .bind(title)
                .execute(&mut **tx)
                .await
                .map_err(ApiError::internal)?;
        }

        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            sqlx::query(
                "INSERT OR REPLACE INTO course_content
                 (chunk_id, content, course_title, lesson_number, chunk_index, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(Self::chunk_id(chunk))
            .bind(&chunk.content)
            .bind(&chunk.course_title)
            .bind(chunk.lesson_number.map(i64::from))
            .bind(chunk.chunk_index as i64)
            .bind(Self::serialize_embedding(embedding))
            .execute(&mut **tx)
            .await
            .map_err(ApiError::internal)?;
        }

        Ok(())
    }

    async fn load_course(&self, title: &str) -> Result<Option<Course>, ApiError> {
        let row = sqlx::query(
            "SELECT title, instructor, course_link, lessons FROM course_catalog WHERE title = ?1",
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(row.as_ref().map(Self::row_to_course))
    }

    fn row_to_course(row: &sqlx::sqlite::SqliteRow) -> Course {
        let lessons_json: String = row.get("lessons");
        let lessons = serde_json::from_str::<Vec<Lesson>>(&lessons_json).unwrap_or_default();

        Course {
            title: row.get("title"),
            instructor: row.get("instructor"),
            course_link: row.get("course_link"),
            lessons,
        }
    }

    fn chunk_id(chunk: &CourseChunk) -> String {
        let digest = Sha256::digest(format!("{}\u{0}{}", chunk.course_title, chunk.chunk_index));
        hex::encode(&digest[..16])
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        let denom = norm_a * norm_b;

        if denom <= f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add_course_metadata(&self, course: &Course) -> Result<(), ApiError> {
        let embedding = self.embed_one(&course.title).await?;

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        Self::upsert_catalog(&mut tx, course, &embedding).await?;
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn add_course_content(&self, chunks: &[CourseChunk]) -> Result<(), ApiError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let embeddings = self.embed_chunks(chunks).await?;
        let titles: BTreeSet<&str> = chunks.iter().map(|c| c.course_title.as_str()).collect();

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        Self::replace_content(&mut tx, titles, chunks, &embeddings).await?;
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn add_course(&self, course: &Course, chunks: &[CourseChunk]) -> Result<(), ApiError> {
        // Embed everything before touching the database.
        let title_embedding = self.embed_one(&course.title).await?;
        let embeddings = self.embed_chunks(chunks).await?;

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        Self::upsert_catalog(&mut tx, course, &title_embedding).await?;
        Self::replace_content(&mut tx, [course.title.as_str()], chunks, &embeddings).await?;
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, ApiError> {
        let course_title = match query.course_name.as_deref() {
            Some(name) => match self.resolve_course_name(name).await? {
                Some(title) => Some(title),
                None => {
                    return Ok(SearchResults::empty_with_error(format!(
                        "No course found matching '{}'",
                        name
                    )))
                }
            },
            None => None,
        };

        let query_embedding = self.embed_one(&query.query).await?;

        let rows = sqlx::query(
            "SELECT content, course_title, lesson_number, embedding
             FROM course_content
             WHERE (?1 IS NULL OR course_title = ?1)
               AND (?2 IS NULL OR lesson_number = ?2)",
        )
        .bind(&course_title)
        .bind(query.lesson_number.map(i64::from))
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        // (similarity, content, course title, lesson number)
        let mut scored: Vec<(f32, String, String, Option<u32>)> = rows
            .into_iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row.get("embedding");
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored = Self::deserialize_embedding(&embedding_bytes);
                let content: String = row.get("content");
                let title: String = row.get("course_title");
                let lesson_number = row
                    .get::<Option<i64>, _>("lesson_number")
                    .and_then(|n| u32::try_from(n).ok());
                Some((
                    Self::cosine_similarity(&query_embedding, &stored),
                    content,
                    title,
                    lesson_number,
                ))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.limit.unwrap_or(self.max_results).max(1));

        let mut courses: HashMap<String, Option<Course>> = HashMap::new();
        let mut hits = Vec::with_capacity(scored.len());

        for (score, content, title, lesson_number) in scored {
            if !courses.contains_key(&title) {
                let course = self.load_course(&title).await?;
                courses.insert(title.clone(), course);
            }
            let lesson_link = lesson_number.and_then(|number| {
                courses
                    .get(&title)
                    .and_then(|course| course.as_ref())
                    .and_then(|course| course.lesson(number))
                    .and_then(|lesson| lesson.lesson_link.clone())
            });

            hits.push(SearchHit {
                content,
                course_title: title,
                lesson_number,
                lesson_link,
                distance: 1.0 - score,
            });
        }

        Ok(SearchResults::from_hits(hits))
    }

    async fn resolve_course_name(&self, course_name: &str) -> Result<Option<String>, ApiError> {
        let wanted = course_name.trim();
        if wanted.is_empty() {
            return Ok(None);
        }

        let catalog: Vec<(String, Vec<f32>)> =
            sqlx::query("SELECT title, embedding FROM course_catalog")
                .fetch_all(&self.pool)
                .await
                .map_err(ApiError::internal)?
                .iter()
                .map(|row| {
                    let title: String = row.get("title");
                    let bytes: Vec<u8> = row.get("embedding");
                    (title, Self::deserialize_embedding(&bytes))
                })
                .collect();
        if catalog.is_empty() {
            return Ok(None);
        }

        let wanted_lower = wanted.to_lowercase();

        if let Some((title, _)) = catalog
            .iter()
            .find(|(title, _)| title.to_lowercase() == wanted_lower)
        {
            return Ok(Some(title.clone()));
        }

        if let Some((title, _)) = catalog
            .iter()
            .filter(|(title, _)| title.to_lowercase().contains(&wanted_lower))
            .min_by_key(|(title, _)| title.len())
        {
            return Ok(Some(title.clone()));
        }

        let query_embedding = self.embed_one(wanted).await?;
        let best = catalog
            .iter()
            .map(|(title, embedding)| (Self::cosine_similarity(&query_embedding, embedding), title))
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(best
            .filter(|(score, _)| *score > 0.0)
            .map(|(_, title)| title.clone()))
    }

    async fn get_course_outline(&self, course_name: &str) -> Result<Option<Course>, ApiError> {
        match self.resolve_course_name(course_name).await? {
            Some(title) => self.load_course(&title).await,
            None => Ok(None),
        }
    }

    async fn existing_course_titles(&self) -> Result<Vec<String>, ApiError> {
        sqlx::query_scalar("SELECT title FROM course_catalog ORDER BY created_at, title")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    async fn course_count(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM course_catalog")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(count as usize)
    }

    async fn clear_all(&self) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        sqlx::query("DELETE FROM course_content")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        sqlx::query("DELETE FROM course_catalog")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rag::embedding::HashingEmbedder;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Hashing embedder that rejects multi-text batches while `failing` is set.
    pub(crate) struct FlakyEmbedder {
        inner: HashingEmbedder,
        failing: AtomicBool,
    }

    impl FlakyEmbedder {
        pub(crate) fn new(dimension: usize) -> Self {
            Self {
                inner: HashingEmbedder::new(dimension),
                failing: AtomicBool::new(false),
            }
        }

        pub(crate) fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            if self.failing.load(Ordering::SeqCst) && inputs.len() > 1 {
                return Err(ApiError::Upstream("413 batch too large".to_string()));
            }
            self.inner.embed(inputs).await
        }
    }

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("course-rag-test-{}.db", uuid::Uuid::new_v4()))
    }

    async fn test_store() -> SqliteVectorStore {
        SqliteVectorStore::with_path(temp_db(), Arc::new(HashingEmbedder::new(256)), 5)
            .await
            .unwrap()
    }

    fn python_basics() -> Course {
        Course {
            title: "Python Basics".to_string(),
            course_link: Some("https://example.com/python-basics".to_string()),
            instructor: Some("Jane Doe".to_string()),
            lessons: vec![
                Lesson {
                    lesson_number: 1,
                    title: "Introduction to Python".to_string(),
                    lesson_link: Some("https://example.com/python-basics/lesson1".to_string()),
                },
                Lesson {
                    lesson_number: 2,
                    title: "Variables and Data Types".to_string(),
                    lesson_link: None,
                },
            ],
        }
    }

    fn chunk(content: &str, course: &str, lesson: Option<u32>, index: usize) -> CourseChunk {
        CourseChunk {
            content: content.to_string(),
            course_title: course.to_string(),
            lesson_number: lesson,
            chunk_index: index,
        }
    }

    async fn seeded_store() -> SqliteVectorStore {
        let store = test_store().await;
        store.add_course_metadata(&python_basics()).await.unwrap();
        store
            .add_course_content(&[
                chunk("Lesson 1 content: Python is a high-level programming language.", "Python Basics", Some(1), 0),
                chunk("Python supports multiple programming paradigms.", "Python Basics", Some(1), 1),
                chunk("Lesson 2 content: Variables store data values in Python.", "Python Basics", Some(2), 2),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn search_ranks_and_attaches_lesson_links() {
        let store = seeded_store().await;

        let results = store.search(&SearchQuery::new("variables data values")).await.unwrap();
        assert!(results.error.is_none());
        assert_eq!(results.hits.len(), 3);
        assert_eq!(results.hits[0].lesson_number, Some(2));
        assert!(results.hits[0].lesson_link.is_none());
        assert!(results.hits[0].distance <= results.hits[1].distance);

        let lesson_one = results.hits.iter().find(|h| h.lesson_number == Some(1)).unwrap();
        assert_eq!(
            lesson_one.lesson_link.as_deref(),
            Some("https://example.com/python-basics/lesson1")
        );
    }

    #[tokio::test]
    async fn search_applies_course_and_lesson_filters() {
        let store = seeded_store().await;

        let query = SearchQuery {
            query: "Python".to_string(),
            course_name: Some("python".to_string()),
            lesson_number: Some(1),
            limit: None,
        };
        let results = store.search(&query).await.unwrap();
        assert_eq!(results.hits.len(), 2);
        assert!(results
            .hits
            .iter()
            .all(|h| h.course_title == "Python Basics" && h.lesson_number == Some(1)));
    }

    #[tokio::test]
    async fn unknown_course_is_reported_as_search_error() {
        let store = test_store().await;

        let query = SearchQuery {
            query: "anything".to_string(),
            course_name: Some("Nonexistent".to_string()),
            ..Default::default()
        };
        let results = store.search(&query).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(
            results.error.as_deref(),
            Some("No course found matching 'Nonexistent'")
        );
    }

    #[tokio::test]
    async fn outline_and_catalog_queries() {
        let store = seeded_store().await;

        let outline = store.get_course_outline("Python Basics").await.unwrap().unwrap();
        assert_eq!(outline, python_basics());

        assert_eq!(store.course_count().await.unwrap(), 1);
        assert_eq!(
            store.existing_course_titles().await.unwrap(),
            vec!["Python Basics".to_string()]
        );
        assert!(store.get_course_outline("Quantum Chemistry").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_falls_back_to_embedding_similarity() {
        let store = seeded_store().await;
        let title = store.resolve_course_name("basics of python").await.unwrap();
        assert_eq!(title.as_deref(), Some("Python Basics"));
    }

    #[tokio::test]
    async fn re_adding_a_shrunken_course_drops_its_old_chunks() {
        let store = seeded_store().await;

        let mut revised = python_basics();
        revised.lessons.truncate(1);
        store
            .add_course(
                &revised,
                &[chunk("Lesson 1 content: Python is a high-level programming language.", "Python Basics", Some(1), 0)],
            )
            .await
            .unwrap();

        let results = store.search(&SearchQuery::new("Python")).await.unwrap();
        assert_eq!(results.hits.len(), 1);

        let lesson_two = SearchQuery {
            query: "variables".to_string(),
            lesson_number: Some(2),
            ..Default::default()
        };
        assert!(store.search(&lesson_two).await.unwrap().is_empty());
        assert_eq!(store.get_course_outline("Python Basics").await.unwrap().unwrap().lessons.len(), 1);
    }

    #[tokio::test]
    async fn content_batches_replace_only_their_own_courses() {
        let store = seeded_store().await;
        store
            .add_course_content(&[chunk("Rust ownership moves values.", "Rust Basics", Some(1), 0)])
            .await
            .unwrap();
        store
            .add_course_content(&[chunk("Python supports multiple programming paradigms.", "Python Basics", Some(1), 0)])
            .await
            .unwrap();

        let results = store.search(&SearchQuery::new("ownership paradigms")).await.unwrap();
        assert_eq!(results.hits.len(), 2);
    }

    #[tokio::test]
    async fn failed_embedding_leaves_no_catalog_entry() {
        let embedder = Arc::new(FlakyEmbedder::new(256));
        let store = SqliteVectorStore::with_path(temp_db(), embedder.clone(), 5)
            .await
            .unwrap();
        let chunks = [
            chunk("Lesson 1 content: Python is a high-level programming language.", "Python Basics", Some(1), 0),
            chunk("Lesson 2 content: Variables store data values in Python.", "Python Basics", Some(2), 1),
        ];

        embedder.set_failing(true);
        let err = store.add_course(&python_basics(), &chunks).await.unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
        assert_eq!(store.course_count().await.unwrap(), 0);

        embedder.set_failing(false);
        store.add_course(&python_basics(), &chunks).await.unwrap();
        assert_eq!(store.course_count().await.unwrap(), 1);
        assert_eq!(store.search(&SearchQuery::new("variables")).await.unwrap().hits.len(), 2);
    }

    #[tokio::test]
    async fn clear_all_and_embedding_model_change() {
        let path = temp_db();
        let store = SqliteVectorStore::with_path(path.clone(), Arc::new(HashingEmbedder::new(64)), 5)
            .await
            .unwrap();
        store.add_course_metadata(&python_basics()).await.unwrap();
        drop(store);

        let reopened = SqliteVectorStore::with_path(path.clone(), Arc::new(HashingEmbedder::new(64)), 5)
            .await
            .unwrap();
        assert_eq!(reopened.course_count().await.unwrap(), 1);
        drop(reopened);

        let switched = SqliteVectorStore::with_path(path, Arc::new(HashingEmbedder::new(128)), 5)
            .await
            .unwrap();
        assert_eq!(switched.course_count().await.unwrap(), 0);

        switched.add_course_metadata(&python_basics()).await.unwrap();
        switched.clear_all().await.unwrap();
        assert_eq!(switched.course_count().await.unwrap(), 0);
    }
}
