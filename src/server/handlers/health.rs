use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let total_courses = state.rag.store().course_count().await?;
    let active_sessions = state.rag.sessions().session_count().await;
    Ok(Json(json!({
        "status": "ok",
        "model": state.config.llm.model,
        "total_courses": total_courses,
        "active_sessions": active_sessions
    })))
}
