use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::core::errors::ApiError;
use crate::state::AppState;
use crate::system::CourseAnalytics;

pub async fn get_course_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CourseAnalytics>, ApiError> {
    Ok(Json(state.rag.course_analytics().await?))
}
