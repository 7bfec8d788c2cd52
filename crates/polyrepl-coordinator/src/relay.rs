//! Streaming relay.
//!
//! Turns a backend's incremental chunks into wire frames while buffering
//! the full transcript, then reconciles the buffer into one durable history
//! entry per kind. The relay keeps working after the client disconnects, so
//! history reflects what actually ran.

use std::sync::Arc;

use polyrepl_core::{
    ContextCodec, EntryKind, ExecutionBackend, ExecutionOutcome, HistoryEntry, OutputChunk,
    OutputKind, SessionId, SessionStore, StreamFrame,
};
use tokio::sync::mpsc;

use crate::coordinator::{Coordinator, CoordinatorError, persist_environment};

/// Depth of the chunk and frame channels. Bounded so a slow consumer
/// applies backpressure to the backend instead of growing a buffer.
const CHANNEL_CAPACITY: usize = 64;

/// Buffered transcript plus the ids of the history entries mirroring it.
struct RelayState {
    store: Arc<dyn SessionStore>,
    session: SessionId,
    out_buf: String,
    err_buf: String,
    out_entry: Option<String>,
    err_entry: Option<String>,
}

impl RelayState {
    fn new(store: Arc<dyn SessionStore>, session: SessionId) -> Self {
        Self {
            store,
            session,
            out_buf: String::new(),
            err_buf: String::new(),
            out_entry: None,
            err_entry: None,
        }
    }

    /// Fold a chunk into the transcript and mirror it to durable history:
    /// the first chunk of a kind appends a placeholder entry (visible to a
    /// client reloading mid-stream), later chunks update it in place.
    async fn absorb(&mut self, chunk: &OutputChunk) {
        match chunk.kind {
            OutputKind::Output => self.out_buf.push_str(&chunk.content),
            OutputKind::Error => self.err_buf.push_str(&chunk.content),
        }
        self.sync_entry(chunk.kind).await;
    }

    async fn sync_entry(&mut self, kind: OutputKind) {
        let (content, slot, entry_kind) = match kind {
            OutputKind::Output => (self.out_buf.clone(), &mut self.out_entry, EntryKind::Output),
            OutputKind::Error => (self.err_buf.clone(), &mut self.err_entry, EntryKind::Error),
        };

        if let Some(entry_id) = slot.as_deref() {
            if let Err(e) = self
                .store
                .update_history(self.session, entry_id, content)
                .await
            {
                tracing::warn!(session = %self.session, error = %e, "failed to update streamed history entry");
            }
        } else {
            let entry = HistoryEntry::new(entry_kind, content);
            let entry_id = entry.id.clone();
            match self.store.append_history(self.session, entry).await {
                Ok(()) => *slot = Some(entry_id),
                Err(e) => {
                    tracing::warn!(session = %self.session, error = %e, "failed to append streamed history entry");
                }
            }
        }
    }

    /// Error text the backend reported but never streamed (the timeout
    /// path), relative to what was already buffered.
    fn err_tail(&self, error: &str) -> Option<String> {
        error
            .strip_prefix(self.err_buf.as_str())
            .filter(|tail| !tail.is_empty())
            .map(str::to_string)
    }

    fn push_error(&mut self, message: &str) {
        self.err_buf.push_str(message);
    }

    /// Align the buffers with the authoritative outcome and write the final
    /// content of each entry.
    async fn finalize(&mut self, output: &str, error: Option<&str>) {
        if !output.is_empty() {
            self.out_buf = output.to_string();
            self.sync_entry(OutputKind::Output).await;
        }
        if let Some(error) = error {
            if !error.is_empty() {
                self.err_buf = error.to_string();
                self.sync_entry(OutputKind::Error).await;
            }
        }
    }
}

fn frame_for(chunk: &OutputChunk) -> StreamFrame {
    match chunk.kind {
        OutputKind::Output => StreamFrame::Output {
            content: chunk.content.clone(),
        },
        OutputKind::Error => StreamFrame::Error {
            content: chunk.content.clone(),
        },
    }
}

impl<B, C> Coordinator<B, C>
where
    B: ExecutionBackend + 'static,
    C: ContextCodec<Context = B::Context> + 'static,
{
    /// Start a streaming execution.
    ///
    /// Validation failures surface as `Err` before any frame exists. On
    /// success the returned receiver yields zero or more `output`/`error`
    /// frames followed by exactly one `complete` frame. Dropping the
    /// receiver stops frame delivery but neither execution, history
    /// finalization, nor persistence.
    ///
    /// # Errors
    /// Fails on blank code, unknown session, bound-language mismatch, a
    /// busy session, or a store/codec failure while fetching the context.
    pub async fn execute_streaming(
        &self,
        id: SessionId,
        code: &str,
    ) -> Result<mpsc::Receiver<StreamFrame>, CoordinatorError> {
        if code.trim().is_empty() {
            return Err(CoordinatorError::EmptyCode);
        }
        self.validate(id).await?;
        let guard = self.try_acquire(id)?;

        // Under implicit mode an unknown id is created now, so the input
        // entry has a session to land in.
        if self.config.implicit_sessions && self.store.get_session(id).await?.is_none() {
            self.store
                .touch_activity(id, self.backend.language())
                .await?;
        }

        // The input entry lands before the first frame, so a client
        // reloading mid-stream sees the command it issued.
        self.append_entry(id, HistoryEntry::new(EntryKind::Input, code))
            .await;

        let ctx = self.fetch_context(id).await?;
        let pre_call = ctx.clone();

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<OutputChunk>(CHANNEL_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::channel::<StreamFrame>(CHANNEL_CAPACITY);

        let backend = Arc::clone(&self.backend);
        let code = code.to_string();
        let budget = self.config.exec_timeout;
        let timeout_message = self.timeout_message();

        let exec = tokio::spawn(async move {
            match tokio::time::timeout(budget, backend.execute_streaming(ctx, &code, chunk_tx))
                .await
            {
                Ok(result) => result,
                Err(_) => Ok(ExecutionOutcome {
                    output: String::new(),
                    error: Some(timeout_message),
                    context: pre_call,
                }),
            }
        });

        let store = Arc::clone(&self.store);
        let codec = Arc::clone(&self.codec);
        let language = self.backend.language().clone();

        tokio::spawn(async move {
            // Session exclusivity spans the whole stream.
            let _guard = guard;
            let mut state = RelayState::new(Arc::clone(&store), id);
            let mut client_gone = false;

            // A consumer that disconnects or stops reading must not hold the
            // session lock past the execution budget, so every frame send is
            // bounded by it.
            while let Some(chunk) = chunk_rx.recv().await {
                let frame = frame_for(&chunk);
                state.absorb(&chunk).await;
                if !client_gone && frame_tx.send_timeout(frame, budget).await.is_err() {
                    client_gone = true;
                    tracing::debug!(session = %id, "stream consumer stalled or went away, buffering only");
                }
            }

            let return_code = match exec.await {
                Ok(Ok(outcome)) => {
                    if let Some(error) = outcome.error.as_deref() {
                        if !client_gone {
                            if let Some(tail) = state.err_tail(error) {
                                let _ = frame_tx
                                    .send_timeout(StreamFrame::Error { content: tail }, budget)
                                    .await;
                            }
                        }
                    }
                    state
                        .finalize(&outcome.output, outcome.error.as_deref())
                        .await;
                    persist_environment(store.as_ref(), codec.as_ref(), &language, id, &outcome.context)
                        .await;
                    i32::from(outcome.error.is_some())
                }
                Ok(Err(e)) => {
                    let message = e.to_string();
                    tracing::error!(session = %id, error = %message, "backend failed mid-stream");
                    if !client_gone {
                        let _ = frame_tx
                            .send_timeout(
                                StreamFrame::Error {
                                    content: message.clone(),
                                },
                                budget,
                            )
                            .await;
                    }
                    state.push_error(&message);
                    state.sync_entry(OutputKind::Error).await;
                    1
                }
                Err(e) => {
                    tracing::error!(session = %id, error = %e, "execution task failed");
                    1
                }
            };

            if !client_gone {
                let _ = frame_tx
                    .send_timeout(StreamFrame::complete(return_code), budget)
                    .await;
            }
        });

        Ok(frame_rx)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use polyrepl_backend::{CalcBackend, CalcCodec, CalcContext, Value};
    use polyrepl_core::{Language, Session};
    use polyrepl_store::MemoryStore;
    use uuid::Uuid;

    use super::*;
    use crate::coordinator::{Coordinator, CoordinatorConfig, CoordinatorError};

    async fn setup() -> (Arc<MemoryStore>, Coordinator<CalcBackend, CalcCodec>, Session) {
        let store = Arc::new(MemoryStore::new(false));
        let session = store
            .create_session(None, Language::new("calc"))
            .await
            .unwrap();
        let coord = Coordinator::new(
            store.clone() as Arc<dyn SessionStore>,
            Arc::new(CalcBackend::new()),
            Arc::new(CalcCodec),
            CoordinatorConfig::default(),
        );
        (store, coord, session)
    }

    async fn collect(mut rx: mpsc::Receiver<StreamFrame>) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    fn decode(store_env: &polyrepl_core::EnvironmentState) -> CalcContext {
        use polyrepl_core::ContextCodec as _;
        CalcCodec.decode(Some(&store_env.serialized_data)).unwrap()
    }

    #[tokio::test]
    async fn stream_yields_output_then_complete_zero() {
        let (store, coord, session) = setup().await;

        let rx = coord.execute_streaming(session.id, "a = 2\na * 3").await.unwrap();
        let frames = collect(rx).await;
        assert_eq!(
            frames,
            vec![
                StreamFrame::Output {
                    content: "6\n".to_string()
                },
                StreamFrame::complete(0),
            ]
        );

        // The complete frame is sent after persistence, so state is settled.
        let history = store.list_history(session.id).await.unwrap();
        let kinds: Vec<EntryKind> = history.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EntryKind::Input, EntryKind::Output]);
        assert_eq!(history[0].content, "a = 2\na * 3");
        assert_eq!(history[1].content, "6\n");

        let env = store.get_environment(session.id).await.unwrap().unwrap();
        assert_eq!(decode(&env).get("a"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn streamed_chunks_reconcile_into_one_history_entry() {
        let (store, coord, session) = setup().await;

        let rx = coord
            .execute_streaming(session.id, "x = 1\nx\nx + 1")
            .await
            .unwrap();
        let frames = collect(rx).await;
        assert_eq!(
            frames,
            vec![
                StreamFrame::Output {
                    content: "1\n".to_string()
                },
                StreamFrame::Output {
                    content: "2\n".to_string()
                },
                StreamFrame::complete(0),
            ]
        );

        // Two frames, one durable entry with the full transcript.
        let history = store.list_history(session.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].kind, EntryKind::Output);
        assert_eq!(history[1].content, "1\n2\n");
    }

    #[tokio::test]
    async fn user_error_streams_and_completes_with_one() {
        let (store, coord, session) = setup().await;

        let rx = coord.execute_streaming(session.id, "ghost").await.unwrap();
        let frames = collect(rx).await;
        assert_eq!(
            frames,
            vec![
                StreamFrame::Error {
                    content: "name 'ghost' is not defined".to_string()
                },
                StreamFrame::complete(1),
            ]
        );

        let history = store.list_history(session.id).await.unwrap();
        let kinds: Vec<EntryKind> = history.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EntryKind::Input, EntryKind::Error]);
    }

    #[tokio::test]
    async fn validation_fails_before_any_frame() {
        let (_, coord, session) = setup().await;

        assert!(matches!(
            coord.execute_streaming(session.id, "  ").await,
            Err(CoordinatorError::EmptyCode)
        ));
        assert!(matches!(
            coord.execute_streaming(Uuid::new_v4(), "1 + 1").await,
            Err(CoordinatorError::Store(_))
        ));
    }

    #[tokio::test]
    async fn stalled_consumer_releases_the_session_within_budget() {
        let store = Arc::new(MemoryStore::new(false));
        let session = store
            .create_session(None, Language::new("calc"))
            .await
            .unwrap();
        let coord = Coordinator::new(
            store.clone() as Arc<dyn SessionStore>,
            Arc::new(CalcBackend::new()),
            Arc::new(CalcCodec),
            CoordinatorConfig {
                exec_timeout: Duration::from_millis(200),
                implicit_sessions: false,
            },
        );

        // Enough output lines to fill both bounded channels.
        let code = format!("x = 1\n{}", "x\n".repeat(300));
        let rx = coord.execute_streaming(session.id, &code).await.unwrap();
        // Keep the receiver open but never read a frame.

        let mut released = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if coord.execute(session.id, "x").await.is_ok() {
                released = true;
                break;
            }
        }
        assert!(released, "session lock was never released");
        drop(rx);

        // The buffered transcript was still finalized into history.
        let history = store.list_history(session.id).await.unwrap();
        assert!(history.iter().any(|e| e.kind == EntryKind::Output));
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_stop_finalization() {
        let (store, coord, session) = setup().await;

        let rx = coord
            .execute_streaming(session.id, "b = 4\nb")
            .await
            .unwrap();
        drop(rx);

        // The relay finishes in the background; wait for persistence.
        let mut env = None;
        for _ in 0..100 {
            env = store.get_environment(session.id).await.unwrap();
            if env.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let env = env.expect("environment was never persisted");
        assert_eq!(decode(&env).get("b"), Some(&Value::Int(4)));

        let history = store.list_history(session.id).await.unwrap();
        assert_eq!(history.last().map(|e| e.content.as_str()), Some("4\n"));
    }
}
