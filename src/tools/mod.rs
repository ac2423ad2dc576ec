//! Tools the model may call, and the per-query ledger that runs them.

mod outline;
mod search;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::ApiError;
use crate::llm::types::ToolDefinition;

pub use outline::CourseOutlineTool;
pub use search::CourseSearchTool;

/// A citation shown next to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub text: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub sources: Vec<Source>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sources: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, input: &Value) -> Result<ToolOutput, ApiError>;
}

/// Name-keyed tool lookup. Definitions are offered in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("Tool '{}' registered twice; keeping the latest", name);
        } else {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Starts a fresh source ledger for one top-level query.
    pub fn start_run(&self) -> ToolRun<'_> {
        ToolRun {
            registry: self,
            sources: Vec::new(),
        }
    }
}

/// Result of one tool invocation as handed back to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallResult {
    pub content: String,
    pub is_error: bool,
}

/// Executes tools for a single query and accumulates their sources in
/// execution order.
pub struct ToolRun<'a> {
    registry: &'a ToolRegistry,
    sources: Vec<Source>,
}

impl<'a> ToolRun<'a> {
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Never fails: lookup and execution errors are returned as error text
    /// so the model can see them.
    pub async fn execute(&mut self, name: &str, input: &Value) -> ToolCallResult {
        let Some(tool) = self.registry.get(name) else {
            tracing::warn!("Model requested unknown tool '{}'", name);
            return ToolCallResult {
                content: format!("Tool '{}' not found", name),
                is_error: true,
            };
        };

        match tool.execute(input).await {
            Ok(output) => {
                self.sources.extend(output.sources);
                ToolCallResult {
                    content: output.content,
                    is_error: false,
                }
            }
            Err(err) => {
                tracing::warn!("Tool '{}' failed: {}", name, err);
                ToolCallResult {
                    content: format!("Tool '{}' failed: {}", name, err),
                    is_error: true,
                }
            }
        }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn into_sources(self) -> Vec<Source> {
        self.sources
    }
}

/// Reads an optional string argument, treating blanks as absent.
pub(crate) fn optional_str(input: &Value, key: &str) -> Option<String> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn required_str(input: &Value, key: &str) -> Result<String, ApiError> {
    optional_str(input, key)
        .ok_or_else(|| ApiError::BadRequest(format!("Missing required argument '{}'", key)))
}

/// Accepts integers as numbers or numeric strings.
pub(crate) fn optional_u32(input: &Value, key: &str) -> Result<Option<u32>, ApiError> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("Argument '{}' must be a positive integer", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("Argument '{}' must be a positive integer", key))),
        Some(_) => Err(ApiError::BadRequest(format!(
            "Argument '{}' must be a positive integer",
            key
        ))),
    }
}
