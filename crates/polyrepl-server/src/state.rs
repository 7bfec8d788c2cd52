//! Shared application state.

use std::sync::Arc;

use polyrepl_backend::{CalcBackend, CalcCodec};
use polyrepl_coordinator::Coordinator;
use polyrepl_core::SessionStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session store, also used directly by the session management routes.
    pub store: Arc<dyn SessionStore>,
    /// Coordinator driving the execution routes.
    pub coordinator: Arc<Coordinator<CalcBackend, CalcCodec>>,
}
