use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, optional_u32, required_str, Source, Tool, ToolOutput};
use crate::core::errors::ApiError;
use crate::llm::types::ToolDefinition;
use crate::rag::{SearchHit, SearchQuery, VectorStore};

pub const SEARCH_TOOL_NAME: &str = "search_course_content";

/// Semantic search over course chunks with optional course and lesson filters.
pub struct CourseSearchTool {
    store: Arc<dyn VectorStore>,
}

impl CourseSearchTool {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    fn header(hit: &SearchHit) -> String {
        match hit.lesson_number {
            Some(number) => format!("{} - Lesson {}", hit.course_title, number),
            None => hit.course_title.clone(),
        }
    }

    fn empty_message(course_name: Option<&str>, lesson_number: Option<u32>) -> String {
        let mut message = String::from("No relevant content found");
        if let Some(course) = course_name {
            message.push_str(&format!(" in course '{}'", course));
        }
        if let Some(lesson) = lesson_number {
            message.push_str(&format!(" in lesson {}", lesson));
        }
        message
    }
}

#[async_trait]
impl Tool for CourseSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: SEARCH_TOOL_NAME.to_string(),
            description: "Search course materials with smart course name matching and lesson filtering"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to search for in the course content"
                    },
                    "course_name": {
                        "type": "string",
                        "description": "Course title (partial matches work, e.g. 'MCP', 'Introduction')"
                    },
                    "lesson_number": {
                        "type": "integer",
                        "description": "Specific lesson number to search within (e.g. 1, 2, 3)"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, input: &Value) -> Result<ToolOutput, ApiError> {
        let query = SearchQuery {
            query: required_str(input, "query")?,
            course_name: optional_str(input, "course_name"),
            lesson_number: optional_u32(input, "lesson_number")?,
            limit: None,
        };

        let results = self.store.search(&query).await?;

        if let Some(error) = results.error {
            return Ok(ToolOutput::text(error));
        }

        if results.is_empty() {
            return Ok(ToolOutput::text(Self::empty_message(
                query.course_name.as_deref(),
                query.lesson_number,
            )));
        }

        let mut blocks = Vec::with_capacity(results.hits.len());
        let mut sources = Vec::with_capacity(results.hits.len());

        for hit in &results.hits {
            let header = Self::header(hit);
            blocks.push(format!("[{}]\n{}", header, hit.content));
            sources.push(Source {
                text: header,
                link: hit.lesson_link.clone(),
            });
        }

        Ok(ToolOutput {
            content: blocks.join("\n\n"),
            sources,
        })
    }
}
