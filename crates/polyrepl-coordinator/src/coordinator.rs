//! Coordinator for session-bound executions.
//!
//! Each request moves through validating, fetching, executing, persisting
//! and responding. The session's environment and history live only in the
//! store; the coordinator holds no authoritative state of its own.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use polyrepl_core::{
    BackendError, CodecError, ContextCodec, EntryKind, ExecuteResponse, ExecutionBackend,
    ExecutionOutcome, HistoryEntry, Language, SessionId, SessionStore, StoreError,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Coordinator error.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Code cannot be empty")]
    EmptyCode,
    #[error("Session is busy with another execution")]
    SessionBusy,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Coordinator tuning knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Ceiling applied to every execution, streaming included.
    pub exec_timeout: Duration,
    /// Allow `touch_activity` to auto-create unknown sessions.
    pub implicit_sessions: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            exec_timeout: Duration::from_secs(30),
            implicit_sessions: false,
        }
    }
}

/// Orchestrates executions against one backend and one store.
///
/// Per-session exclusivity is enforced with a keyed mutex held from fetch
/// through persist (the whole stream for streaming requests); a second
/// request for a busy session is rejected rather than queued.
pub struct Coordinator<B, C>
where
    B: ExecutionBackend,
    C: ContextCodec<Context = B::Context>,
{
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) backend: Arc<B>,
    pub(crate) codec: Arc<C>,
    pub(crate) config: CoordinatorConfig,
    locks: StdMutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl<B, C> Coordinator<B, C>
where
    B: ExecutionBackend + 'static,
    C: ContextCodec<Context = B::Context> + 'static,
{
    /// Create a new coordinator.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<B>,
        codec: Arc<C>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            backend,
            codec,
            config,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Language served by the underlying backend.
    #[must_use]
    pub fn language(&self) -> &Language {
        self.backend.language()
    }

    /// Execute `code` against the session and return the full response.
    ///
    /// # Errors
    /// Fails before execution on blank code, unknown session, bound-language
    /// mismatch, or a busy session. User-code failures are not errors; they
    /// arrive in the response's `error` field with state persisted.
    pub async fn execute(
        &self,
        id: SessionId,
        code: &str,
    ) -> Result<ExecuteResponse, CoordinatorError> {
        // Validating
        if code.trim().is_empty() {
            return Err(CoordinatorError::EmptyCode);
        }
        self.validate(id).await?;
        let _guard = self.try_acquire(id)?;

        // Fetching + Executing
        let outcome = self.run(id, code).await?;

        // Persisting (best-effort: never masks the execution result)
        self.persist(id, &outcome.context).await;

        // Responding
        self.record_history(id, code, &outcome).await;
        Ok(ExecuteResponse {
            output: outcome.output,
            error: outcome.error,
        })
    }

    /// Discard the session's environment, keeping its history and binding.
    ///
    /// # Errors
    /// Fails on unknown session or when an execution is in flight.
    pub async fn reset(&self, id: SessionId) -> Result<(), CoordinatorError> {
        let _guard = self.try_acquire(id)?;
        self.store.delete_environment(id).await?;
        // A fresh context is informative only; there is nothing to persist.
        let _ = self.backend.reset();
        Ok(())
    }

    /// Drop coordinator-local state for a deleted session.
    pub fn forget_session(&self, id: SessionId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub(crate) async fn validate(&self, id: SessionId) -> Result<(), CoordinatorError> {
        match self.store.get_session(id).await? {
            Some(session) => {
                if session.language == *self.backend.language() {
                    Ok(())
                } else {
                    Err(StoreError::LanguageMismatch {
                        id,
                        bound: session.language,
                        requested: self.backend.language().clone(),
                    }
                    .into())
                }
            }
            None if self.config.implicit_sessions => Ok(()),
            None => Err(StoreError::NotFound(id).into()),
        }
    }

    pub(crate) fn try_acquire(
        &self,
        id: SessionId,
    ) -> Result<OwnedMutexGuard<()>, CoordinatorError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Idle entries (no guard alive) are dropped here so that
            // implicit-mode ids do not accumulate map entries forever.
            locks.retain(|entry_id, lock| *entry_id == id || Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id).or_default())
        };
        lock.try_lock_owned()
            .map_err(|_| CoordinatorError::SessionBusy)
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Fetch the environment, decode it, and run the backend under the
    /// execution budget. A timeout becomes a user-level error carrying the
    /// pre-call context, so state is reported rather than silently dropped.
    async fn run(
        &self,
        id: SessionId,
        code: &str,
    ) -> Result<ExecutionOutcome<B::Context>, CoordinatorError> {
        let ctx = self.fetch_context(id).await?;
        let pre_call = ctx.clone();

        match tokio::time::timeout(self.config.exec_timeout, self.backend.execute(ctx, code)).await
        {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!(session = %id, "execution exceeded time budget");
                Ok(ExecutionOutcome {
                    output: String::new(),
                    error: Some(self.timeout_message()),
                    context: pre_call,
                })
            }
        }
    }

    pub(crate) async fn fetch_context(
        &self,
        id: SessionId,
    ) -> Result<B::Context, CoordinatorError> {
        let blob = match self.store.get_environment(id).await {
            Ok(env) => env.map(|e| e.serialized_data),
            // The session will be auto-created at persist time.
            Err(StoreError::NotFound(_)) if self.config.implicit_sessions => None,
            Err(e) => return Err(e.into()),
        };
        Ok(self.codec.decode(blob.as_deref())?)
    }

    pub(crate) fn timeout_message(&self) -> String {
        format!(
            "Execution timed out after {} seconds",
            self.config.exec_timeout.as_secs()
        )
    }

    pub(crate) async fn persist(&self, id: SessionId, ctx: &B::Context) {
        persist_environment(
            self.store.as_ref(),
            self.codec.as_ref(),
            self.backend.language(),
            id,
            ctx,
        )
        .await;
    }

    async fn record_history(
        &self,
        id: SessionId,
        code: &str,
        outcome: &ExecutionOutcome<B::Context>,
    ) {
        self.append_entry(id, HistoryEntry::new(EntryKind::Input, code))
            .await;
        if !outcome.output.is_empty() {
            self.append_entry(
                id,
                HistoryEntry::new(EntryKind::Output, outcome.output.as_str()),
            )
            .await;
        }
        if let Some(error) = &outcome.error {
            self.append_entry(id, HistoryEntry::new(EntryKind::Error, error.as_str()))
                .await;
        }
    }

    pub(crate) async fn append_entry(&self, id: SessionId, entry: HistoryEntry) {
        if let Err(e) = self.store.append_history(id, entry).await {
            tracing::warn!(session = %id, error = %e, "failed to append history entry");
        }
    }
}

/// Persist an updated context and record activity. Failures are logged and
/// swallowed: the user's result has already been computed and state loss is
/// preferable to dropping it.
pub(crate) async fn persist_environment<C: ContextCodec>(
    store: &dyn SessionStore,
    codec: &C,
    language: &Language,
    id: SessionId,
    ctx: &C::Context,
) {
    // Touch first so implicit sessions exist before the environment write.
    if let Err(e) = store.touch_activity(id, language).await {
        tracing::warn!(session = %id, error = %e, "failed to record session activity");
    }
    match codec.encode(ctx) {
        Ok(blob) => {
            if let Err(e) = store.put_environment(id, language, blob).await {
                tracing::warn!(session = %id, error = %e, "failed to persist environment");
            }
        }
        Err(e) => {
            tracing::warn!(session = %id, error = %e, "failed to encode execution context");
        }
    }
}
