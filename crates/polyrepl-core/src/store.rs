//! Session store contract.
//!
//! The store is the single source of truth for session metadata, the
//! serialized environment blob, and the ordered history log. Coordinators
//! never mutate shared state outside these operations.

use async_trait::async_trait;
use thiserror::Error;

use crate::session::{EnvironmentState, HistoryEntry, Language, Session, SessionId};

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("History entry not found: {0}")]
    EntryNotFound(String),
    #[error("Session {id} is configured for {bound}, cannot execute {requested} code")]
    LanguageMismatch {
        id: SessionId,
        bound: Language,
        requested: Language,
    },
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for session storage backends.
///
/// All mutating operations on a given session id must be linearizable with
/// respect to each other; implementations enforce this at the storage layer
/// (a single lock over the records, or serialized SQL statements), never by
/// relying on the caller.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new session bound to `language` for its lifetime.
    ///
    /// A missing `name` gets a generated default.
    async fn create_session(
        &self,
        name: Option<String>,
        language: Language,
    ) -> Result<Session, StoreError>;

    /// Get a session by id.
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    /// List all sessions, most recently accessed first.
    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;

    /// Remove a session together with its environment and history.
    ///
    /// The caller is responsible for telling the execution backend to drop
    /// any adapter-local state for the id.
    async fn delete_session(&self, id: SessionId) -> Result<(), StoreError>;

    /// Rename a session.
    async fn rename_session(&self, id: SessionId, name: String) -> Result<(), StoreError>;

    /// Record execution activity: bump `last_accessed` and the execution
    /// counter after validating the language binding.
    ///
    /// Fails closed with [`StoreError::LanguageMismatch`] when `language`
    /// differs from the bound one. When the store allows implicit creation,
    /// an unknown id is auto-created bound to `language` instead of failing.
    async fn touch_activity(&self, id: SessionId, language: &Language) -> Result<(), StoreError>;

    /// Get the serialized environment, if one is stored.
    async fn get_environment(&self, id: SessionId)
    -> Result<Option<EnvironmentState>, StoreError>;

    /// Store or overwrite the serialized environment.
    async fn put_environment(
        &self,
        id: SessionId,
        language: &Language,
        blob: String,
    ) -> Result<(), StoreError>;

    /// Discard the environment, leaving the language binding and history
    /// untouched.
    async fn delete_environment(&self, id: SessionId) -> Result<(), StoreError>;

    /// Append a history entry.
    async fn append_history(&self, id: SessionId, entry: HistoryEntry) -> Result<(), StoreError>;

    /// Replace the content of an existing history entry in place.
    ///
    /// This is the only mutation path for history entries; it exists to
    /// reconcile streamed output. Last write wins under concurrent updates.
    async fn update_history(
        &self,
        id: SessionId,
        entry_id: &str,
        content: String,
    ) -> Result<(), StoreError>;

    /// List history entries in insertion order.
    async fn list_history(&self, id: SessionId) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Remove all history entries.
    async fn clear_history(&self, id: SessionId) -> Result<(), StoreError>;
}
