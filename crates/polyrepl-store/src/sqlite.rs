//! SQLite session storage (feature-gated).
//!
//! Durable store backing session metadata, environment blobs, and the
//! history log. History lives in its own table with an autoincrement
//! sequence column, so append and update are single statements and
//! insertion order is explicit.

use std::str::FromStr;

use async_trait::async_trait;
use polyrepl_core::{
    EntryKind, EnvironmentState, HistoryEntry, Language, Session, SessionId, SessionStore,
    StoreError, session::unix_now,
};
use sqlx::{
    Row,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
};
use uuid::Uuid;

/// SQLite storage implementation.
pub struct SqliteStore {
    pool: SqlitePool,
    implicit_creation: bool,
}

fn internal<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Internal(e.to_string())
}

impl SqliteStore {
    /// Open (or create) the database at `url` and prepare the schema.
    ///
    /// Accepts any sqlx SQLite url, including `sqlite::memory:`.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrated.
    pub async fn connect(url: &str, implicit_creation: bool) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(internal)?
            .create_if_missing(true);

        // A single connection serializes all writers at the storage layer
        // and keeps `sqlite::memory:` databases coherent across calls.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(internal)?;

        let store = Self {
            pool,
            implicit_creation,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                language TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                execution_count INTEGER NOT NULL DEFAULT 0,
                env_language TEXT,
                env_data TEXT,
                env_updated INTEGER
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_session ON history (session_id, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        Ok(())
    }

    async fn session_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
        Ok(row.get("n"))
    }

    async fn history_for(&self, id: SessionId) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT entry_id, kind, content, created_at FROM history
             WHERE session_id = ?1 ORDER BY seq",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        rows.iter().map(history_entry_from_row).collect()
    }

    /// Bump `last_accessed`, failing with `NotFound` for unknown sessions.
    async fn require_session(&self, id: SessionId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sessions SET last_accessed = ?1 WHERE id = ?2")
            .bind(unix_now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

fn history_entry_from_row(row: &SqliteRow) -> Result<HistoryEntry, StoreError> {
    let kind: String = row.get("kind");
    Ok(HistoryEntry {
        id: row.get("entry_id"),
        kind: kind.parse().map_err(StoreError::Internal)?,
        content: row.get("content"),
        created_at: row.get("created_at"),
    })
}

#[allow(clippy::cast_sign_loss)]
fn session_from_row(row: &SqliteRow) -> Result<Session, StoreError> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id).map_err(internal)?;

    let environment = match (
        row.get::<Option<String>, _>("env_language"),
        row.get::<Option<String>, _>("env_data"),
        row.get::<Option<i64>, _>("env_updated"),
    ) {
        (Some(language), Some(data), Some(updated)) => Some(EnvironmentState {
            language: Language::new(language),
            serialized_data: data,
            last_updated: updated,
        }),
        _ => None,
    };

    Ok(Session {
        id,
        name: row.get("name"),
        language: Language::new(row.get::<String, _>("language")),
        created_at: row.get("created_at"),
        last_accessed: row.get("last_accessed"),
        execution_count: row.get::<i64, _>("execution_count") as u64,
        history: Vec::new(),
        environment,
    })
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(
        &self,
        name: Option<String>,
        language: Language,
    ) -> Result<Session, StoreError> {
        let timestamp = unix_now();
        let name = match name {
            Some(name) => name,
            None => format!("Session {}", self.session_count().await? + 1),
        };

        let session = Session {
            id: Uuid::new_v4(),
            name,
            language,
            created_at: timestamp,
            last_accessed: timestamp,
            execution_count: 0,
            history: Vec::new(),
            environment: None,
        };

        sqlx::query(
            "INSERT INTO sessions (id, name, language, created_at, last_accessed, execution_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        )
        .bind(session.id.to_string())
        .bind(&session.name)
        .bind(session.language.as_str())
        .bind(session.created_at)
        .bind(session.last_accessed)
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut session = session_from_row(&row)?;
        session.history = self.history_for(id).await?;
        Ok(Some(session))
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY last_accessed DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut session = session_from_row(row)?;
            session.history = self.history_for(session.id).await?;
            sessions.push(session);
        }
        Ok(sessions)
    }

    async fn delete_session(&self, id: SessionId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;

        sqlx::query("DELETE FROM history WHERE session_id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(internal)?;

        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(internal)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        tx.commit().await.map_err(internal)
    }

    async fn rename_session(&self, id: SessionId, name: String) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE sessions SET name = ?1, last_accessed = ?2 WHERE id = ?3")
                .bind(name)
                .bind(unix_now())
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(internal)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn touch_activity(&self, id: SessionId, language: &Language) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let timestamp = unix_now();

        let row = sqlx::query("SELECT language FROM sessions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?;

        match row {
            Some(row) => {
                let bound: String = row.get("language");
                if bound != language.as_str() {
                    return Err(StoreError::LanguageMismatch {
                        id,
                        bound: Language::new(bound),
                        requested: language.clone(),
                    });
                }
                sqlx::query(
                    "UPDATE sessions
                     SET last_accessed = ?1, execution_count = execution_count + 1
                     WHERE id = ?2",
                )
                .bind(timestamp)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            }
            None => {
                if !self.implicit_creation {
                    return Err(StoreError::NotFound(id));
                }
                let count_row = sqlx::query("SELECT COUNT(*) AS n FROM sessions")
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(internal)?;
                let count: i64 = count_row.get("n");
                sqlx::query(
                    "INSERT INTO sessions
                     (id, name, language, created_at, last_accessed, execution_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                )
                .bind(id.to_string())
                .bind(format!("Session {}", count + 1))
                .bind(language.as_str())
                .bind(timestamp)
                .bind(timestamp)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            }
        }

        tx.commit().await.map_err(internal)
    }

    async fn get_environment(
        &self,
        id: SessionId,
    ) -> Result<Option<EnvironmentState>, StoreError> {
        let row = sqlx::query("SELECT env_language, env_data, env_updated FROM sessions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;

        let Some(row) = row else {
            return Err(StoreError::NotFound(id));
        };

        match (
            row.get::<Option<String>, _>("env_language"),
            row.get::<Option<String>, _>("env_data"),
            row.get::<Option<i64>, _>("env_updated"),
        ) {
            (Some(language), Some(data), Some(updated)) => Ok(Some(EnvironmentState {
                language: Language::new(language),
                serialized_data: data,
                last_updated: updated,
            })),
            _ => Ok(None),
        }
    }

    async fn put_environment(
        &self,
        id: SessionId,
        language: &Language,
        blob: String,
    ) -> Result<(), StoreError> {
        let timestamp = unix_now();
        let result = sqlx::query(
            "UPDATE sessions
             SET env_language = ?1, env_data = ?2, env_updated = ?3, last_accessed = ?3
             WHERE id = ?4",
        )
        .bind(language.as_str())
        .bind(blob)
        .bind(timestamp)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete_environment(&self, id: SessionId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE sessions
             SET env_language = NULL, env_data = NULL, env_updated = NULL, last_accessed = ?1
             WHERE id = ?2",
        )
        .bind(unix_now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn append_history(&self, id: SessionId, entry: HistoryEntry) -> Result<(), StoreError> {
        self.require_session(id).await?;

        sqlx::query(
            "INSERT INTO history (session_id, entry_id, kind, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(id.to_string())
        .bind(&entry.id)
        .bind(entry.kind.as_str())
        .bind(&entry.content)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        Ok(())
    }

    async fn update_history(
        &self,
        id: SessionId,
        entry_id: &str,
        content: String,
    ) -> Result<(), StoreError> {
        self.require_session(id).await?;

        let result =
            sqlx::query("UPDATE history SET content = ?1 WHERE session_id = ?2 AND entry_id = ?3")
                .bind(content)
                .bind(id.to_string())
                .bind(entry_id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::EntryNotFound(entry_id.to_string()));
        }
        Ok(())
    }

    async fn list_history(&self, id: SessionId) -> Result<Vec<HistoryEntry>, StoreError> {
        self.require_session(id).await?;
        self.history_for(id).await
    }

    async fn clear_history(&self, id: SessionId) -> Result<(), StoreError> {
        self.require_session(id).await?;

        sqlx::query("DELETE FROM history WHERE session_id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(internal)?;

        Ok(())
    }
}
