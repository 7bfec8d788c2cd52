//! HTTP server for the session execution service.
//!
//! Provides:
//! - execution routes (`/execute`, `/execute-stream`, `/reset`, `/health`)
//! - session management routes (`/sessions/…`)
//! - env-driven configuration and CORS policy

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post, put},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use config::Config;
pub use state::AppState;

/// Build the application router.
#[must_use]
pub fn router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(routes::execute::health))
        .route("/execute/{session_id}", post(routes::execute::execute))
        .route(
            "/execute-stream/{session_id}",
            post(routes::execute::execute_stream),
        )
        .route("/reset/{session_id}", post(routes::execute::reset))
        .route(
            "/sessions",
            get(routes::sessions::list_sessions).post(routes::sessions::create_session),
        )
        .route(
            "/sessions/{id}",
            get(routes::sessions::get_session).delete(routes::sessions::delete_session),
        )
        .route("/sessions/{id}/rename", put(routes::sessions::rename_session))
        .route(
            "/sessions/{id}/activity",
            put(routes::sessions::touch_activity),
        )
        .route(
            "/sessions/{id}/history",
            get(routes::sessions::list_history)
                .post(routes::sessions::append_history)
                .delete(routes::sessions::clear_history),
        )
        .route(
            "/sessions/{id}/history/{entry_id}",
            put(routes::sessions::update_history),
        )
        .route(
            "/sessions/{id}/environment",
            get(routes::sessions::get_environment)
                .put(routes::sessions::put_environment)
                .delete(routes::sessions::delete_environment),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config))
        .with_state(state)
}

/// Permissive CORS in development, configured origins everywhere else.
fn cors_layer(config: &Config) -> CorsLayer {
    if config.is_development() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
