//! Execution backend adapter contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::Language;

/// Kind tag on a streamed output chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Output,
    Error,
}

/// One incremental piece of output emitted during streaming execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub kind: OutputKind,
    pub content: String,
}

impl OutputChunk {
    /// Create an output chunk.
    #[must_use]
    pub fn output<S: Into<String>>(content: S) -> Self {
        Self {
            kind: OutputKind::Output,
            content: content.into(),
        }
    }

    /// Create an error chunk.
    #[must_use]
    pub fn error<S: Into<String>>(content: S) -> Self {
        Self {
            kind: OutputKind::Error,
            content: content.into(),
        }
    }
}

/// Result of running one piece of code against a context.
///
/// `error` carries user-code failures; it is not a transport error. The
/// returned `context` reflects whatever progress the code made before
/// succeeding or failing.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome<C> {
    pub output: String,
    pub error: Option<String>,
    pub context: C,
}

/// Adapter-internal failure (the runtime itself broke, not the user's code).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend failure: {0}")]
    Internal(String),
}

/// Trait for per-language execution backends.
///
/// Implementations run source code against a live execution context and
/// report output, user-level error, and the updated context. User-code
/// failures never surface as `Err`; `Err` is reserved for internal faults.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Live, language-native execution context. Shared by reference across
    /// task boundaries while persisting, hence `Sync`.
    type Context: Clone + Send + Sync + 'static;

    /// Language this backend serves.
    fn language(&self) -> &Language;

    /// Run `code` against `ctx` and return the outcome.
    async fn execute(
        &self,
        ctx: Self::Context,
        code: &str,
    ) -> Result<ExecutionOutcome<Self::Context>, BackendError>;

    /// Run `code`, emitting chunks on `emit` as output becomes available.
    ///
    /// The returned outcome's `output` and `error` must equal the
    /// concatenation of the emitted chunks of the respective kind; the
    /// streaming relay relies on this to reconstruct one durable history
    /// entry from many frames. A closed `emit` channel must not abort
    /// execution.
    async fn execute_streaming(
        &self,
        ctx: Self::Context,
        code: &str,
        emit: mpsc::Sender<OutputChunk>,
    ) -> Result<ExecutionOutcome<Self::Context>, BackendError>;

    /// Return a fresh, empty context. No store side effects.
    fn reset(&self) -> Self::Context;
}
