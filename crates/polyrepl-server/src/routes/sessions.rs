//! Session management routes: CRUD, activity, history, environment.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use polyrepl_core::{EntryKind, HistoryEntry, Language, SessionId, StoreError};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "calc".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub language: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendEntryRequest {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEntryRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PutEnvironmentRequest {
    pub language: String,
    pub serialized_data: String,
}

/// `GET /sessions`
pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let sessions = state.store.list_sessions().await?;
    let total = sessions.len();
    Ok(Json(json!({ "sessions": sessions, "total": total })))
}

/// `POST /sessions`
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .store
        .create_session(req.name, Language::new(req.language))
        .await?;
    Ok(Json(serde_json::to_value(session).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

/// `GET /sessions/{id}`
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .store
        .get_session(id)
        .await?
        .ok_or(StoreError::NotFound(id))?;
    Ok(Json(serde_json::to_value(session).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

/// `DELETE /sessions/{id}`
///
/// Cascades in the store, then tells the coordinator to drop its local
/// state for the id.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Json<Value>, ApiError> {
    state.store.delete_session(id).await?;
    state.coordinator.forget_session(id);
    Ok(Json(json!({ "message": "Session deleted successfully" })))
}

/// `PUT /sessions/{id}/rename`
pub async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<Value>, ApiError> {
    state.store.rename_session(id, req.name).await?;
    Ok(Json(json!({ "message": "Session renamed successfully" })))
}

/// `PUT /sessions/{id}/activity?language=…`
pub async fn touch_activity(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Value>, ApiError> {
    state
        .store
        .touch_activity(id, &Language::new(query.language))
        .await?;
    Ok(Json(json!({ "message": "Activity recorded" })))
}

/// `GET /sessions/{id}/history`
pub async fn list_history(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Json<Value>, ApiError> {
    let history = state.store.list_history(id).await?;
    let count = history.len();
    Ok(Json(json!({ "history": history, "count": count })))
}

/// `POST /sessions/{id}/history`
pub async fn append_history(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(req): Json<AppendEntryRequest>,
) -> Result<Json<HistoryEntry>, ApiError> {
    let entry = HistoryEntry::new(req.kind, req.content);
    state.store.append_history(id, entry.clone()).await?;
    Ok(Json(entry))
}

/// `PUT /sessions/{id}/history/{entry_id}`
pub async fn update_history(
    State(state): State<AppState>,
    Path((id, entry_id)): Path<(SessionId, String)>,
    Json(req): Json<UpdateEntryRequest>,
) -> Result<Json<Value>, ApiError> {
    state.store.update_history(id, &entry_id, req.content).await?;
    Ok(Json(json!({ "message": "History entry updated" })))
}

/// `DELETE /sessions/{id}/history`
pub async fn clear_history(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Json<Value>, ApiError> {
    state.store.clear_history(id).await?;
    Ok(Json(json!({ "message": "History cleared" })))
}

/// `GET /sessions/{id}/environment`
pub async fn get_environment(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Json<Value>, ApiError> {
    let env = state
        .store
        .get_environment(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No environment stored for session {id}")))?;
    Ok(Json(serde_json::to_value(env).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

/// `PUT /sessions/{id}/environment`
pub async fn put_environment(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(req): Json<PutEnvironmentRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .store
        .put_environment(id, &Language::new(req.language), req.serialized_data)
        .await?;
    Ok(Json(json!({ "message": "Environment stored" })))
}

/// `DELETE /sessions/{id}/environment`
pub async fn delete_environment(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Json<Value>, ApiError> {
    state.store.delete_environment(id).await?;
    Ok(Json(json!({ "message": "Environment cleared" })))
}
