//! Reference execution backend for the calc language.
//!
//! Provides:
//! - `CalcContext` - the live binding table for one session
//! - `CalcBackend` - `ExecutionBackend` implementation
//! - `CalcCodec` - `ContextCodec` implementation (JSON + base64)

pub mod interp;

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use polyrepl_core::{
    BackendError, CodecError, ContextCodec, ExecutionBackend, ExecutionOutcome, Language,
    OutputChunk,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use interp::{CalcError, Value};

/// Live execution context: the variable bindings of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalcContext {
    bindings: HashMap<String, Value>,
}

impl CalcContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a binding.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the context holds no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Run one line, mapping the echoed value to printable text.
///
/// `Err` carries the user-facing error message.
fn run_line_text(ctx: &mut CalcContext, line: &str) -> Result<Option<String>, String> {
    match interp::run_line(&mut ctx.bindings, line) {
        Ok(Some(value)) => Ok(Some(format!("{value}\n"))),
        Ok(None) => Ok(None),
        Err(e) => Err(e.to_string()),
    }
}

/// Execution backend for the calc language.
///
/// Programs run line by line; the first failing line stops execution and
/// reports its error, while bindings made by earlier lines are kept. That
/// partial progress lands in the returned context and is persisted.
pub struct CalcBackend {
    language: Language,
}

impl CalcBackend {
    /// Create a new backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            language: Language::new("calc"),
        }
    }
}

impl Default for CalcBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for CalcBackend {
    type Context = CalcContext;

    fn language(&self) -> &Language {
        &self.language
    }

    async fn execute(
        &self,
        mut ctx: CalcContext,
        code: &str,
    ) -> Result<ExecutionOutcome<CalcContext>, BackendError> {
        let mut output = String::new();
        let mut error = None;

        for line in code.lines() {
            match run_line_text(&mut ctx, line) {
                Ok(Some(text)) => output.push_str(&text),
                Ok(None) => {}
                Err(message) => {
                    error = Some(message);
                    break;
                }
            }
        }

        Ok(ExecutionOutcome {
            output,
            error,
            context: ctx,
        })
    }

    async fn execute_streaming(
        &self,
        mut ctx: CalcContext,
        code: &str,
        emit: mpsc::Sender<OutputChunk>,
    ) -> Result<ExecutionOutcome<CalcContext>, BackendError> {
        let mut output = String::new();
        let mut error = None;

        for line in code.lines() {
            match run_line_text(&mut ctx, line) {
                Ok(Some(text)) => {
                    output.push_str(&text);
                    // A closed channel means the consumer is gone; keep
                    // executing so the final outcome stays complete.
                    let _ = emit.send(OutputChunk::output(text)).await;
                }
                Ok(None) => {}
                Err(message) => {
                    let _ = emit.send(OutputChunk::error(message.clone())).await;
                    error = Some(message);
                    break;
                }
            }
        }

        Ok(ExecutionOutcome {
            output,
            error,
            context: ctx,
        })
    }

    fn reset(&self) -> CalcContext {
        CalcContext::new()
    }
}

/// Codec for calc contexts: JSON bindings wrapped in base64.
///
/// Every calc value (integers, floats, strings) serializes faithfully, so
/// nothing is omitted or flagged; the round-trip law holds for all contexts
/// this backend can produce.
pub struct CalcCodec;

impl ContextCodec for CalcCodec {
    type Context = CalcContext;

    fn encode(&self, ctx: &CalcContext) -> Result<String, CodecError> {
        let json = serde_json::to_vec(ctx).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    fn decode(&self, blob: Option<&str>) -> Result<CalcContext, CodecError> {
        let Some(blob) = blob else {
            return Ok(CalcContext::new());
        };
        if blob.is_empty() {
            return Ok(CalcContext::new());
        }
        let bytes = BASE64
            .decode(blob)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
