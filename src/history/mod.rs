//! In-memory conversation history, bounded per session.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    fn label(self) -> &'static str {
        match self {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Default)]
struct Session {
    messages: VecDeque<HistoryMessage>,
}

pub struct SessionManager {
    max_history: usize,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    /// `max_history` counts exchanges; each exchange holds two messages.
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_session(&self) -> String {
        let session_id = format!("session_{}", Uuid::new_v4());
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Session::default());
        tracing::debug!("Created session {}", session_id);
        session_id
    }

    /// Records one user/assistant exchange, creating the session if needed.
    pub async fn add_exchange(&self, session_id: &str, user: &str, assistant: &str) {
        let limit = self.max_history * 2;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::default);

        session.messages.push_back(HistoryMessage {
            role: MessageRole::User,
            content: user.to_string(),
        });
        session.messages.push_back(HistoryMessage {
            role: MessageRole::Assistant,
            content: assistant.to_string(),
        });
        while session.messages.len() > limit {
            session.messages.pop_front();
        }
    }

    /// History rendered for the system prompt, or `None` when empty.
    pub async fn get_conversation_history(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(session_id)?;
        if session.messages.is_empty() {
            return None;
        }

        Some(
            session
                .messages
                .iter()
                .map(|m| format!("{}: {}", m.role.label(), m.content))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    pub async fn clear_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            tracing::debug!("Cleared session {}", session_id);
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
