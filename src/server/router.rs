use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

use crate::core::logging;
use crate::server::handlers::{courses, health, query, sessions};
use crate::state::AppState;

/// Creates the application router: the JSON API, a health check, and the
/// static frontend when its directory exists.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.config.server.cors_allowed_origins);
    let frontend_dir = state.paths.resolve(&state.config.server.frontend_dir);

    let mut app = Router::new()
        .route("/health", get(health::health))
        .route("/api/query", post(query::query_documents))
        .route("/api/courses", get(courses::get_course_stats))
        .route("/api/sessions/:session_id", delete(sessions::delete_session))
        .with_state(state);

    if frontend_dir.is_dir() {
        tracing::info!("Serving frontend from {}", frontend_dir.display());
        app = app.fallback_service(ServeDir::new(frontend_dir).append_index_html_on_directories(true));
    } else {
        tracing::warn!(
            "Frontend directory {} not found; serving API only",
            frontend_dir.display()
        );
    }

    app.layer(cors_layer).layer(logging::http_trace_layer())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<&str> = origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .collect();

    let allow_origin = if origins.is_empty() || origins.contains(&"*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .into_iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect::<Vec<_>>(),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}
