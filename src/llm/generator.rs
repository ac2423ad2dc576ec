//! Answer generation with bounded sequential tool use.
//!
//! The model gets at most `max_tool_rounds` rounds of tool calls. After the
//! last permitted round the tools are withdrawn from the request, so the
//! final call has to produce an answer from what has been gathered.

use std::sync::Arc;

use super::provider::LlmProvider;
use super::types::{
    ContentBlock, Message, MessageRequest, MessageResponse, ToolChoice, ToolDefinition,
};
use crate::core::config::LlmConfig;
use crate::core::errors::ApiError;
use crate::tools::ToolRun;

fn system_prompt(max_tool_rounds: u32) -> String {
    format!(
        "You are an AI assistant specialized in course materials and educational content, \
with tools for searching course content and retrieving course outlines.

Tools:
1. get_course_outline: returns a course's title, link and complete numbered lesson list. \
Use it for outlines, course structure, lesson lists or \"what lessons\" questions.
2. search_course_content: searches within course materials. Use it only for questions \
about specific course content. If it finds nothing, say so plainly.

Sequential tool use:
- You may make up to {max_tool_rounds} sequential tool calls per question.
- Use a later call only for complementary or comparative information, e.g. \
\"Compare lesson 1 and lesson 3\" means searching lesson 1, then lesson 3.
- Prefer a single call when it is enough. \"What's in lesson 1?\" needs one search.
- After the last permitted call you must give your final answer.

Response protocol:
- General knowledge questions: answer directly without tools.
- Course structure questions: use get_course_outline first.
- Course content questions: use search_course_content first, then answer.
- No meta-commentary. Do not mention the search results or the tools.

Answers must be brief, educational and clear, with examples where they help. \
Provide only the direct answer to what was asked."
    )
}

/// States of one generation.
#[derive(Debug)]
enum LoopState {
    /// Nothing sent yet.
    Idle,
    /// The model asked for tools; `round` is the 1-based round about to run.
    AwaitingTool {
        round: u32,
        response: MessageResponse,
    },
    /// The response to answer with.
    Final(MessageResponse),
}

pub struct AIGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    max_tool_rounds: u32,
}

impl AIGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_tool_rounds: config.max_tool_rounds,
        }
    }

    /// Generates an answer for `query`.
    ///
    /// With `tools`, the model may call them for up to `max_tool_rounds`
    /// rounds; their sources accumulate in the run. Tool failures are fed back
    /// to the model as error results. Provider failures are returned as `Err`.
    pub async fn generate_response(
        &self,
        query: &str,
        conversation_history: Option<&str>,
        mut tools: Option<&mut ToolRun<'_>>,
    ) -> Result<String, ApiError> {
        let system = match conversation_history {
            Some(history) if !history.trim().is_empty() => format!(
                "{}\n\nPrevious conversation:\n{}",
                system_prompt(self.max_tool_rounds),
                history
            ),
            _ => system_prompt(self.max_tool_rounds),
        };

        let offered: Option<Vec<ToolDefinition>> = tools
            .as_ref()
            .map(|run| run.definitions())
            .filter(|defs| !defs.is_empty());

        let mut messages = vec![Message::user_text(query)];
        let mut last_text = String::new();
        let mut state = LoopState::Idle;

        loop {
            state = match state {
                LoopState::Idle => {
                    let response = self
                        .call(&system, &messages, offered.clone())
                        .await?;
                    self.after_response(response, 0, offered.is_some(), &mut last_text)
                }
                LoopState::AwaitingTool { round, response } => {
                    tracing::debug!(round, max = self.max_tool_rounds, "Tool round");

                    let mut results = Vec::new();
                    if let Some(run) = tools.as_mut() {
                        for (id, name, input) in response.tool_uses() {
                            tracing::debug!(round, tool = name, "Executing tool");
                            let result = run.execute(name, input).await;
                            results.push(ContentBlock::tool_result(
                                id,
                                result.content,
                                result.is_error,
                            ));
                        }
                    }

                    let assistant_content: Vec<ContentBlock> = response
                        .content
                        .into_iter()
                        .filter(|block| !matches!(block, ContentBlock::Unknown))
                        .collect();
                    messages.push(Message::assistant(assistant_content));
                    messages.push(Message::user(results));

                    let tools_next = if round < self.max_tool_rounds {
                        offered.clone()
                    } else {
                        tracing::debug!(round, "Tool budget exhausted; withdrawing tools");
                        None
                    };
                    let can_continue = tools_next.is_some();

                    let next = self.call(&system, &messages, tools_next).await?;
                    self.after_response(next, round, can_continue, &mut last_text)
                }
                LoopState::Final(response) => {
                    let text = response.text();
                    return Ok(if text.trim().is_empty() { last_text } else { text });
                }
            };
        }
    }

    fn after_response(
        &self,
        response: MessageResponse,
        completed_rounds: u32,
        tools_offered: bool,
        last_text: &mut String,
    ) -> LoopState {
        tracing::debug!(
            completed_rounds,
            stop_reason = ?response.stop_reason,
            "Model responded"
        );

        let text = response.text();
        if !text.trim().is_empty() {
            *last_text = text;
        }

        if tools_offered && response.wants_tools() {
            LoopState::AwaitingTool {
                round: completed_rounds + 1,
                response,
            }
        } else {
            LoopState::Final(response)
        }
    }

    async fn call(
        &self,
        system: &str,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<MessageResponse, ApiError> {
        let mut request = MessageRequest {
            model: self.model.clone(),
            system: Some(system.to_string()),
            messages: messages.to_vec(),
            max_tokens: self.max_tokens,
            temperature: 0.0,
            tools,
            tool_choice: None,
        };
        if request.has_tools() {
            request.tool_choice = Some(ToolChoice::Auto);
        }
        self.provider.create_message(&request).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::types::{Role, StopReason};
    use crate::tools::{Source, Tool, ToolOutput, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider that replays scripted responses and records every request.
    pub(crate) struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<MessageResponse, ApiError>>>,
        fallback: Option<MessageResponse>,
        pub requests: Mutex<Vec<MessageRequest>>,
    }

    impl ScriptedProvider {
        pub fn new(responses: Vec<MessageResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(Ok).collect()),
                fallback: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Answers every call with the same response.
        pub fn always(response: MessageResponse) -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                fallback: Some(response),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(err: ApiError) -> Self {
            Self {
                responses: Mutex::new(VecDeque::from(vec![Err(err)])),
                fallback: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<MessageRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse, ApiError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(next) = self.responses.lock().unwrap().pop_front() {
                return next;
            }
            self.fallback
                .clone()
                .ok_or_else(|| ApiError::Internal("script exhausted".to_string()))
        }
    }

    pub(crate) fn text_response(text: &str) -> MessageResponse {
        MessageResponse {
            id: "msg".to_string(),
            model: "test".to_string(),
            content: vec![ContentBlock::text(text)],
            stop_reason: Some(StopReason::EndTurn),
            usage: None,
        }
    }

    pub(crate) fn tool_response(id: &str, name: &str, input: Value) -> MessageResponse {
        MessageResponse {
            id: "msg".to_string(),
            model: "test".to_string(),
            content: vec![ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            }],
            stop_reason: Some(StopReason::ToolUse),
            usage: None,
        }
    }

    struct LessonSearch;

    #[async_trait]
    impl Tool for LessonSearch {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "search_course_content".to_string(),
                description: "search".to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, input: &Value) -> Result<ToolOutput, ApiError> {
            let lesson = input["lesson_number"].as_u64().unwrap_or(0);
            if lesson == 99 {
                return Err(ApiError::Internal("vector store unavailable".to_string()));
            }
            Ok(ToolOutput {
                content: format!("[Course - Lesson {lesson}]\nLesson {lesson} text"),
                sources: vec![Source {
                    text: format!("Course - Lesson {lesson}"),
                    link: None,
                }],
            })
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(LessonSearch));
        registry
    }

    fn generator(provider: Arc<ScriptedProvider>, rounds: u32) -> AIGenerator {
        let config = LlmConfig {
            model: "claude-test".to_string(),
            max_tool_rounds: rounds,
            ..Default::default()
        };
        AIGenerator::new(provider, &config)
    }

    fn tool_results(message: &Message) -> Vec<(String, bool)> {
        message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult { content, is_error, .. } => Some((content.clone(), *is_error)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn direct_answer_takes_one_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("Paris.")]));
        let generator = generator(provider.clone(), 2);
        let registry = registry();
        let mut run = registry.start_run();

        let answer = generator
            .generate_response("Capital of France?", None, Some(&mut run))
            .await
            .unwrap();

        assert_eq!(answer, "Paris.");
        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].has_tools());
        assert_eq!(requests[0].tool_choice, Some(ToolChoice::Auto));
        assert_eq!(requests[0].temperature, 0.0);
        assert!(run.sources().is_empty());
    }

    #[tokio::test]
    async fn always_tool_model_gets_budget_plus_one_calls() {
        for budget in 1..=3 {
            let provider = Arc::new(ScriptedProvider::always(tool_response(
                "tu",
                "search_course_content",
                json!({"query": "x", "lesson_number": 1}),
            )));
            let generator = generator(provider.clone(), budget);
            let registry = registry();
            let mut run = registry.start_run();

            generator
                .generate_response("loop forever", None, Some(&mut run))
                .await
                .unwrap();

            let requests = provider.requests();
            assert_eq!(requests.len() as u32, budget + 1);
            let (last, earlier) = requests.split_last().unwrap();
            assert!(earlier.iter().all(|r| r.has_tools()));
            assert!(!last.has_tools());
            assert!(last.tool_choice.is_none());
            assert_eq!(run.sources().len() as u32, budget);
        }
    }

    #[tokio::test]
    async fn single_search_then_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response("tu_1", "search_course_content", json!({"query": "lesson 1", "lesson_number": 1})),
            text_response("Lesson 1 introduces the course."),
        ]));
        let generator = generator(provider.clone(), 2);
        let registry = registry();
        let mut run = registry.start_run();

        let answer = generator
            .generate_response("What's in lesson 1?", None, Some(&mut run))
            .await
            .unwrap();

        assert!(!answer.is_empty());
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].has_tools());

        let transcript = &requests[1].messages;
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(transcript[2].role, Role::User);
        assert_eq!(
            tool_results(&transcript[2]),
            vec![("[Course - Lesson 1]\nLesson 1 text".to_string(), false)]
        );
        assert_eq!(run.sources().len(), 1);
    }

    #[tokio::test]
    async fn comparison_uses_two_rounds_and_withdraws_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response("tu_1", "search_course_content", json!({"query": "x", "lesson_number": 1})),
            tool_response("tu_2", "search_course_content", json!({"query": "x", "lesson_number": 5})),
            text_response("Lesson 1 covers basics; lesson 5 covers advanced topics."),
        ]));
        let generator = generator(provider.clone(), 2);
        let registry = registry();
        let mut run = registry.start_run();

        let answer = generator
            .generate_response("Compare lesson 1 and lesson 5", None, Some(&mut run))
            .await
            .unwrap();

        assert!(!answer.is_empty());
        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].has_tools());
        assert!(requests[1].has_tools());
        assert!(requests[2].tools.is_none());
        assert_eq!(requests[2].messages.len(), 5);

        let texts: Vec<&str> = run.sources().iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Course - Lesson 1", "Course - Lesson 5"]);
    }

    #[tokio::test]
    async fn tool_errors_are_fed_back_not_raised() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            MessageResponse {
                content: vec![
                    ContentBlock::ToolUse {
                        id: "a".to_string(),
                        name: "search_course_content".to_string(),
                        input: json!({"query": "x", "lesson_number": 99}),
                    },
                    ContentBlock::ToolUse {
                        id: "b".to_string(),
                        name: "no_such_tool".to_string(),
                        input: json!({}),
                    },
                ],
                ..tool_response("", "", json!({}))
            },
            text_response("Sorry, the course search is unavailable."),
        ]));
        let generator = generator(provider.clone(), 2);
        let registry = registry();
        let mut run = registry.start_run();

        let answer = generator
            .generate_response("Explain lesson 99", None, Some(&mut run))
            .await
            .unwrap();
        assert_eq!(answer, "Sorry, the course search is unavailable.");

        let requests = provider.requests();
        let results = tool_results(requests[1].messages.last().unwrap());
        assert_eq!(results.len(), 2);
        assert!(results[0].1 && results[0].0.contains("vector store unavailable"));
        assert_eq!(results[1], ("Tool 'no_such_tool' not found".to_string(), true));
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let provider = Arc::new(ScriptedProvider::failing(ApiError::Upstream("529 overloaded".to_string())));
        let generator = generator(provider, 2);

        let err = generator
            .generate_response("hi", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }

    #[tokio::test]
    async fn unrecognised_stop_reason_ends_the_loop() {
        let mut truncated = text_response("Partial answer");
        truncated.stop_reason = Some(StopReason::MaxTokens);
        let provider = Arc::new(ScriptedProvider::new(vec![truncated]));
        let generator = generator(provider.clone(), 2);
        let registry = registry();
        let mut run = registry.start_run();

        let answer = generator
            .generate_response("long question", None, Some(&mut run))
            .await
            .unwrap();
        assert_eq!(answer, "Partial answer");
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn tool_requests_without_tools_are_not_executed() {
        let provider = Arc::new(ScriptedProvider::always(tool_response(
            "tu",
            "search_course_content",
            json!({"query": "x"}),
        )));
        let generator = generator(provider.clone(), 2);

        let answer = generator.generate_response("q", None, None).await.unwrap();
        assert_eq!(answer, "");
        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].has_tools());
    }

    #[tokio::test]
    async fn falls_back_to_earlier_text_when_final_is_empty() {
        let mut first = tool_response("tu", "search_course_content", json!({"query": "x", "lesson_number": 2}));
        first.content.insert(0, ContentBlock::text("Looking up lesson 2."));
        let mut empty = text_response("");
        empty.content.clear();

        let provider = Arc::new(ScriptedProvider::new(vec![first, empty]));
        let generator = generator(provider, 2);
        let registry = registry();
        let mut run = registry.start_run();

        let answer = generator.generate_response("q", None, Some(&mut run)).await.unwrap();
        assert_eq!(answer, "Looking up lesson 2.");
    }

    #[tokio::test]
    async fn history_is_appended_to_system_prompt() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("ok")]));
        let generator = generator(provider.clone(), 2);

        generator
            .generate_response("follow up", Some("User: hi\nAssistant: hello"), None)
            .await
            .unwrap();

        let system = provider.requests()[0].system.clone().unwrap();
        assert!(system.contains("up to 2 sequential tool calls"));
        assert!(system.ends_with("Previous conversation:\nUser: hi\nAssistant: hello"));
    }
}
