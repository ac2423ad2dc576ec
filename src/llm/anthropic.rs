use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::provider::LlmProvider;
use super::types::{MessageRequest, MessageResponse};
use crate::core::config::LlmConfig;
use crate::core::errors::ApiError;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        if config.api_key.trim().is_empty() {
            tracing::warn!("ANTHROPIC_API_KEY is not set; model calls will be rejected upstream");
        }

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse, ApiError> {
        let url = format!("{}/v1/messages", self.base_url);

        let res = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Anthropic API error ({}): {}",
                status, text
            )));
        }

        res.json::<MessageResponse>()
            .await
            .map_err(ApiError::internal)
    }
}
