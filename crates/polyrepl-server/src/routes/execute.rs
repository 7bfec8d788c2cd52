//! Execution routes: run code, stream output, reset, health.

use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use polyrepl_core::{CodeRequest, ExecuteResponse, SessionId};
use serde_json::{Value, json};
use tokio_stream::{Stream, StreamExt as _, wrappers::ReceiverStream};

use crate::{error::ApiError, state::AppState};

/// `POST /execute/{session_id}`
pub async fn execute(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(req): Json<CodeRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let response = state.coordinator.execute(session_id, &req.code).await?;
    Ok(Json(response))
}

/// `POST /execute-stream/{session_id}`
///
/// Validation failures are reported with plain HTTP statuses before the
/// stream starts; once streaming, outcomes travel as SSE frames ending in
/// a single `complete` frame.
pub async fn execute_stream(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(req): Json<CodeRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let frames = state
        .coordinator
        .execute_streaming(session_id, &req.code)
        .await?;
    let stream = ReceiverStream::new(frames).map(|frame| Event::default().json_data(&frame));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `POST /reset/{session_id}`
pub async fn reset(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<Value>, ApiError> {
    state.coordinator.reset(session_id).await?;
    Ok(Json(json!({ "message": "Session reset successfully" })))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "language": state.coordinator.language().as_str(),
        "stateless": true,
    }))
}
