use super::defaults::EMBEDDING_PROVIDERS;
use super::schema::AppConfig;
use crate::core::errors::ApiError;

pub fn validate_config(config: &AppConfig) -> Result<(), ApiError> {
    validate_non_empty("server.host", &config.server.host)?;
    for (index, origin) in config.server.cors_allowed_origins.iter().enumerate() {
        validate_non_empty(&format!("server.cors_allowed_origins[{}]", index), origin)?;
    }

    validate_non_empty("llm.model", &config.llm.model)?;
    validate_http_url("llm.base_url", &config.llm.base_url)?;
    validate_range("llm.max_tokens", config.llm.max_tokens as u64, 1, 200_000)?;
    validate_range("llm.max_tool_rounds", config.llm.max_tool_rounds as u64, 1, 16)?;
    validate_range(
        "llm.request_timeout_secs",
        config.llm.request_timeout_secs,
        1,
        86_400,
    )?;

    if !EMBEDDING_PROVIDERS.contains(&config.embedding.provider.as_str()) {
        return Err(ApiError::InvalidConfig(format!(
            "'embedding.provider' must be one of {:?}, got '{}'",
            EMBEDDING_PROVIDERS, config.embedding.provider
        )));
    }
    validate_range(
        "embedding.dimension",
        config.embedding.dimension as u64,
        1,
        65_536,
    )?;
    if config.embedding.provider == "openai_compatible" {
        validate_non_empty("embedding.model", &config.embedding.model)?;
        validate_http_url("embedding.base_url", &config.embedding.base_url)?;
    }

    validate_range("rag.chunk_size", config.rag.chunk_size as u64, 1, 1_000_000)?;
    if config.rag.chunk_overlap >= config.rag.chunk_size {
        return Err(ApiError::InvalidConfig(format!(
            "'rag.chunk_overlap' ({}) must be smaller than 'rag.chunk_size' ({})",
            config.rag.chunk_overlap, config.rag.chunk_size
        )));
    }
    validate_range("rag.max_results", config.rag.max_results as u64, 1, 1_000)?;
    validate_range("rag.max_history", config.rag.max_history as u64, 0, 1_000)?;

    Ok(())
}

fn validate_range(path: &str, value: u64, min: u64, max: u64) -> Result<(), ApiError> {
    if value < min || value > max {
        return Err(ApiError::InvalidConfig(format!(
            "'{}' must be between {} and {}, got {}",
            path, min, max, value
        )));
    }
    Ok(())
}

fn validate_non_empty(path: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidConfig(format!(
            "'{}' cannot be empty",
            path
        )));
    }
    Ok(())
}

fn validate_http_url(path: &str, value: &str) -> Result<(), ApiError> {
    let parsed = reqwest::Url::parse(value)
        .map_err(|e| ApiError::InvalidConfig(format!("'{}' is not a valid URL: {}", path, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ApiError::InvalidConfig(format!(
            "'{}' must use http or https, got '{}'",
            path, other
        ))),
    }
}
