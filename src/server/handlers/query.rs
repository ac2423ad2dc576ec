use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;
use crate::state::AppState;
use crate::tools::Source;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub session_id: String,
}

/// Answers a question, starting a session when the request has none.
pub async fn query_documents(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(payload) = payload?;

    let session_id = match payload.session_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => state.rag.sessions().create_session().await,
    };

    let (answer, sources) = state.rag.query(&payload.query, Some(&session_id)).await?;

    Ok(Json(QueryResponse {
        answer,
        sources,
        session_id,
    }))
}
