use async_trait::async_trait;

use super::types::{MessageRequest, MessageResponse};
use crate::core::errors::ApiError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "anthropic")
    fn name(&self) -> &str;

    /// single request/response call against the hosted model
    async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse, ApiError>;
}
