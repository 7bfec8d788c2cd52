//! Session store implementations.
//!
//! The [`polyrepl_core::SessionStore`] trait is implemented twice:
//! - `MemoryStore` - in-process, for development and tests (feature `memory`)
//! - `SqliteStore` - durable, survives restarts (feature `sqlite`)

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
