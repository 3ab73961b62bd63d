//! StreamingChannelServer — one dedicated binary push subserver per
//! session.
//!
//! DESIGN
//! ======
//! Image payloads are large and high-frequency; they get their own
//! WebSocket server per session so small control messages are never stuck
//! behind them. Ports are allocated from a process-wide counter above a
//! reserved base and are not reused while the owning session lives.
//!
//! PROTOCOL
//! ========
//! 1. On connect the server sends the text `'1'` (liveness handshake).
//! 2. The client sends a session id as text.
//! 3. Unknown sid, or sid without a model → `'0'`; the connection stays
//!    open and unbound for a retry. Known sid with a model → the
//!    connection subscribes to that session's image stream and gets `'1'`.
//! 4. After binding, every image change pushes one binary NPY frame.
//! 5. Close unbinds; a sid sent while already bound is answered `'0'` and
//!    the existing binding stays.
//!
//! LIFECYCLE
//! =========
//! The subserver is a task owned by the session record. Destroying the
//! session flips a watch signal: the accept loop shuts down and every live
//! streaming connection observes the same signal and closes.

use std::sync::atomic::{AtomicU32, Ordering};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::registry::StreamChannel;
use crate::state::AppState;

/// Streaming ports are allocated strictly above this base.
const DEFAULT_PORT_BASE: u16 = 61000;

/// How many candidate ports to probe before giving up.
const MAX_PORT_PROBES: u32 = 32;

static PORT_COUNTER: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no free streaming port available")]
    NoPort,
    #[error("unknown session id: {0:?}")]
    UnknownSession(String),
    #[error("session has no model loaded: {0:?}")]
    ModelNotLoaded(String),
    #[error("streaming connection is already bound")]
    AlreadyBound,
}

#[derive(Clone)]
struct StreamState {
    app: AppState,
    shutdown: watch::Receiver<bool>,
}

// =============================================================================
// SUBSERVER LIFECYCLE
// =============================================================================

/// Start a streaming subserver on the next free port and return its
/// channel descriptor (port, stop signal, task handle).
///
/// # Errors
///
/// Returns [`StreamError::NoPort`] when no port in the probe window binds.
pub async fn spawn(app: AppState) -> Result<StreamChannel, StreamError> {
    let (listener, port) = bind_next_port().await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = StreamState { app, shutdown: shutdown_rx.clone() };
    let router = Router::new().route("/", get(handle_stream)).with_state(state);

    let task = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        });
        if let Err(e) = serve.await {
            error!(port, error = %e, "streaming subserver failed");
        }
    });

    info!(port, "streaming subserver listening");
    Ok(StreamChannel::new(port, shutdown_tx, task))
}

fn port_base() -> u16 {
    std::env::var("BEAMHUB_STREAM_PORT_BASE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT_BASE)
}

/// Allocate monotonically increasing ports, skipping ones the OS refuses.
async fn bind_next_port() -> Result<(TcpListener, u16), StreamError> {
    let base = u32::from(port_base());
    for _ in 0..MAX_PORT_PROBES {
        let candidate = base + PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let Ok(port) = u16::try_from(candidate) else {
            return Err(StreamError::NoPort);
        };
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => return Ok((listener, port)),
            Err(e) => warn!(port, error = %e, "streaming port rejected; probing next"),
        }
    }
    Err(StreamError::NoPort)
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn handle_stream(State(state): State<StreamState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_stream(socket, state))
}

async fn run_stream(mut socket: WebSocket, state: StreamState) {
    // Liveness handshake: the very first thing on the wire is '1'.
    if socket.send(Message::Text("1".into())).await.is_err() {
        return;
    }

    let mut shutdown = state.shutdown.clone();
    let mut images: Option<broadcast::Receiver<Vec<u8>>> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let reply = match bind_sid(&state, text.as_str(), images.is_some()).await {
                            Ok(rx) => {
                                images = Some(rx);
                                "1"
                            }
                            Err(e) => {
                                debug!(error = %e, "stream: binding refused");
                                "0"
                            }
                        };
                        if socket.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            bytes = next_image(&mut images) => {
                if socket.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Resolve a handshake sid to an image subscription.
async fn bind_sid(
    state: &StreamState,
    sid: &str,
    already_bound: bool,
) -> Result<broadcast::Receiver<Vec<u8>>, StreamError> {
    if already_bound {
        return Err(StreamError::AlreadyBound);
    }
    let session = state
        .app
        .registry
        .lookup(sid)
        .await
        .map_err(|_| StreamError::UnknownSession(sid.to_string()))?;
    if !session.model_loaded() {
        return Err(StreamError::ModelNotLoaded(sid.to_string()));
    }
    info!(sid, "stream: connection bound");
    Ok(session.subscribe_images())
}

/// Next image frame once bound; pending forever while unbound. A lagged
/// subscription skips missed frames instead of erroring out.
async fn next_image(images: &mut Option<broadcast::Receiver<Vec<u8>>>) -> Vec<u8> {
    let Some(rx) = images else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(bytes) => return bytes,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "stream: consumer lagged; skipping frames");
            }
            Err(broadcast::error::RecvError::Closed) => return std::future::pending().await,
        }
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;
