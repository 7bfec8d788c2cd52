//! Session execution coordination.
//!
//! Provides:
//! - `Coordinator` - the per-request state machine
//!   (validate, fetch, execute, persist, respond)
//! - Streaming relay - incremental frames plus durable history reconciliation

pub mod coordinator;
pub mod relay;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorError};
