//! Core abstractions for session-bound code execution.
//!
//! This crate provides the fundamental building blocks:
//! - `Session`, `HistoryEntry`, `EnvironmentState` - durable session records
//! - `SessionStore` - trait for the single source of truth on session state
//! - `ExecutionBackend` - per-language adapter contract
//! - `ContextCodec` - serialization contract for execution contexts
//! - Wire types shared by the HTTP surface and the streaming relay

pub mod backend;
pub mod codec;
pub mod session;
pub mod store;
pub mod wire;

pub use backend::{BackendError, ExecutionBackend, ExecutionOutcome, OutputChunk, OutputKind};
pub use codec::{CodecError, ContextCodec};
pub use session::{EntryKind, EnvironmentState, HistoryEntry, Language, Session, SessionId};
pub use store::{SessionStore, StoreError};
pub use wire::{CodeRequest, ExecuteResponse, StreamFrame};
