//! In-memory session storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use polyrepl_core::{
    EnvironmentState, HistoryEntry, Language, Session, SessionId, SessionStore, StoreError,
    session::unix_now,
};
use uuid::Uuid;

/// In-memory storage implementation.
///
/// Useful for development and single-process deployments. Data is lost on
/// restart. Every mutation runs as one critical section under the write
/// lock, which makes operations on a session linearizable.
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    implicit_creation: bool,
}

impl MemoryStore {
    /// Create a new in-memory store.
    ///
    /// With `implicit_creation`, `touch_activity` on an unknown id creates
    /// a minimal session instead of failing.
    #[must_use]
    pub fn new(implicit_creation: bool) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            implicit_creation,
        }
    }

    fn default_name(count: usize) -> String {
        format!("Session {}", count + 1)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(false)
    }
}

fn lock_poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Internal(e.to_string())
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        name: Option<String>,
        language: Language,
    ) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().map_err(lock_poisoned)?;
        let timestamp = unix_now();

        let session = Session {
            id: Uuid::new_v4(),
            name: name.unwrap_or_else(|| Self::default_name(sessions.len())),
            language,
            created_at: timestamp,
            last_accessed: timestamp,
            execution_count: 0,
            history: Vec::new(),
            environment: None,
        };

        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self
            .sessions
            .read()
            .map_err(lock_poisoned)?
            .get(&id)
            .cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.read().map_err(lock_poisoned)?;
        let mut result: Vec<Session> = sessions.values().cloned().collect();
        result.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(result)
    }

    async fn delete_session(&self, id: SessionId) -> Result<(), StoreError> {
        self.sessions
            .write()
            .map_err(lock_poisoned)?
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn rename_session(&self, id: SessionId, name: String) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(lock_poisoned)?;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        session.name = name;
        session.last_accessed = unix_now();
        Ok(())
    }

    async fn touch_activity(&self, id: SessionId, language: &Language) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(lock_poisoned)?;

        if let Some(session) = sessions.get_mut(&id) {
            if session.language != *language {
                return Err(StoreError::LanguageMismatch {
                    id,
                    bound: session.language.clone(),
                    requested: language.clone(),
                });
            }
            session.last_accessed = unix_now();
            session.execution_count += 1;
            return Ok(());
        }

        if !self.implicit_creation {
            return Err(StoreError::NotFound(id));
        }

        let timestamp = unix_now();
        let session = Session {
            id,
            name: Self::default_name(sessions.len()),
            language: language.clone(),
            created_at: timestamp,
            last_accessed: timestamp,
            execution_count: 0,
            history: Vec::new(),
            environment: None,
        };
        sessions.insert(id, session);
        Ok(())
    }

    async fn get_environment(
        &self,
        id: SessionId,
    ) -> Result<Option<EnvironmentState>, StoreError> {
        let sessions = self.sessions.read().map_err(lock_poisoned)?;
        let session = sessions.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(session.environment.clone())
    }

    async fn put_environment(
        &self,
        id: SessionId,
        language: &Language,
        blob: String,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(lock_poisoned)?;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let timestamp = unix_now();
        session.environment = Some(EnvironmentState {
            language: language.clone(),
            serialized_data: blob,
            last_updated: timestamp,
        });
        session.last_accessed = timestamp;
        Ok(())
    }

    async fn delete_environment(&self, id: SessionId) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(lock_poisoned)?;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        session.environment = None;
        session.last_accessed = unix_now();
        Ok(())
    }

    async fn append_history(&self, id: SessionId, entry: HistoryEntry) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(lock_poisoned)?;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        session.history.push(entry);
        session.last_accessed = unix_now();
        Ok(())
    }

    async fn update_history(
        &self,
        id: SessionId,
        entry_id: &str,
        content: String,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(lock_poisoned)?;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let entry = session
            .history
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| StoreError::EntryNotFound(entry_id.to_string()))?;
        entry.content = content;
        session.last_accessed = unix_now();
        Ok(())
    }

    async fn list_history(&self, id: SessionId) -> Result<Vec<HistoryEntry>, StoreError> {
        let sessions = self.sessions.read().map_err(lock_poisoned)?;
        let session = sessions.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(session.history.clone())
    }

    async fn clear_history(&self, id: SessionId) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(lock_poisoned)?;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        session.history.clear();
        session.last_accessed = unix_now();
        Ok(())
    }
}
