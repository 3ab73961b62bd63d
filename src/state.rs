//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the session registry; per-session streaming subservers clone
//! the registry handle so they can resolve handshake sids on their own.

use std::sync::Arc;

use crate::registry::SessionRegistry;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — the registry is Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self { registry: Arc::new(SessionRegistry::new()) }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
