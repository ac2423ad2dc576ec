use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, Source, Tool, ToolOutput};
use crate::core::errors::ApiError;
use crate::llm::types::ToolDefinition;
use crate::rag::{Course, VectorStore};

pub const OUTLINE_TOOL_NAME: &str = "get_course_outline";

pub struct CourseOutlineTool {
    store: Arc<dyn VectorStore>,
}

impl CourseOutlineTool {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    fn render(course: &Course) -> String {
        let mut lines = vec![format!("Course: {}", course.title)];
        if let Some(link) = &course.course_link {
            lines.push(format!("Link: {}", link));
        }
        if let Some(instructor) = &course.instructor {
            lines.push(format!("Instructor: {}", instructor));
        }

        lines.push(String::new());
        if course.lessons.is_empty() {
            lines.push("No lessons listed.".to_string());
        } else {
            lines.push(format!("Lessons ({}):", course.lessons.len()));
            for lesson in &course.lessons {
                lines.push(format!("{}. {}", lesson.lesson_number, lesson.title));
            }
        }

        lines.join("\n")
    }
}

#[async_trait]
impl Tool for CourseOutlineTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: OUTLINE_TOOL_NAME.to_string(),
            description: "Get the outline of a course: title, link and the complete numbered lesson list"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "course_title": {
                        "type": "string",
                        "description": "Course title (partial matches work, e.g. 'MCP', 'Introduction')"
                    }
                },
                "required": ["course_title"]
            }),
        }
    }

    async fn execute(&self, input: &Value) -> Result<ToolOutput, ApiError> {
        let course_title = required_str(input, "course_title")?;

        let Some(course) = self.store.get_course_outline(&course_title).await? else {
            return Ok(ToolOutput::text(format!(
                "No course found matching '{}'",
                course_title
            )));
        };

        Ok(ToolOutput {
            content: Self::render(&course),
            sources: vec![Source {
                text: course.title.clone(),
                link: course.course_link.clone(),
            }],
        })
    }
}
