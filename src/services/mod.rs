//! Domain services used by the websocket routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own session lifecycle, change-notification wiring, and
//! the streaming subserver so route handlers can stay focused on protocol
//! translation.

pub mod files;
pub mod notifier;
pub mod session;
pub mod stream;
