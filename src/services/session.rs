//! Session lifecycle: id generation and model bring-up.
//!
//! ARCHITECTURE
//! ============
//! A session record is created when its control connection arrives; the
//! model, the change-notification bridge, and the streaming subserver are
//! wired together later by `load_session`, all under one lock ticket so a
//! concurrent duplicate load cannot double-wire anything.

use std::fmt::Write;

use rand::Rng;
use tracing::info;

use crate::frame::ErrorCode;
use crate::model::Model;
use crate::registry::RegistryError;
use crate::services::{notifier, stream};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Stream(#[from] stream::StreamError),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Registry(e) => e.error_code(),
            Self::Stream(_) => "E_STREAM",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Registry(e) => e.retryable(),
            Self::Stream(_) => false,
        }
    }
}

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate an opaque 16-byte hex session id.
#[must_use]
pub fn generate_sid() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Bring up a session's model: start the streaming subserver, wire the
/// change notifier, install the model. Idempotent — a session that already
/// has a model keeps it and its streaming port, and that port is returned.
///
/// # Errors
///
/// Fails when the session is unknown, the lock acquisition times out, or
/// no streaming port can be bound.
pub async fn load_session(state: &AppState, sid: &str) -> Result<u16, SessionError> {
    let mut ticket = state.registry.acquire(sid).await?;
    let session = ticket.session().clone();

    if ticket.model().is_some() {
        if let Some(port) = session.stream_port() {
            return Ok(port);
        }
    }

    let port = match session.stream_port() {
        Some(port) => port,
        None => {
            let channel = stream::spawn(state.clone()).await?;
            let port = channel.port;
            session.attach_stream(channel);
            port
        }
    };

    if ticket.model().is_none() {
        let mut model = Model::new();
        notifier::wire(&session, port, &mut model);
        ticket.install(model);
        info!(sid, port, "session model initialized");
    }
    Ok(port)
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
