//! Control-channel WebSocket handler — the command dispatcher.
//!
//! DESIGN
//! ======
//! On upgrade the server creates a session for the connection and enters a
//! `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Change-notification frames from the session's model → forward
//!
//! Handler functions validate, run the command under the session's lock
//! ticket, and return an `Outcome`; the dispatch layer owns replying. All
//! push traffic originates in the change notifier — handlers never re-emit
//! change events, so nothing is ever delivered twice.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → create session → send `session:connected` with the sid
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Close → destroy the session and its streaming channel

use std::path::Path;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, Frame, Status};
use crate::model::ModelError;
use crate::model::image::ImageError;
use crate::model::overlay::OverlayError;
use crate::registry::ModelTicket;
use crate::services;
use crate::services::notifier::overlay_data;
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// build the reply — handlers never send frames directly.
enum Outcome {
    /// Send done+data to the sender.
    Reply(Data),
    /// Send empty done to the sender.
    Done,
}

// =============================================================================
// PROTOCOL ERROR TRANSLATION
// =============================================================================

#[derive(Debug, thiserror::Error)]
#[error("session has no model loaded")]
struct ModelMissing;

impl ErrorCode for ModelMissing {
    fn error_code(&self) -> &'static str {
        "E_MODEL_NOT_LOADED"
    }
}

impl ErrorCode for ImageError {
    fn error_code(&self) -> &'static str {
        "E_IO"
    }
}

impl ErrorCode for ModelError {
    fn error_code(&self) -> &'static str {
        "E_IO"
    }
}

impl ErrorCode for OverlayError {
    fn error_code(&self) -> &'static str {
        "E_OVERLAY_NOT_FOUND"
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let sid = services::session::generate_sid();
    let client_id = Uuid::new_v4();
    let session = state.registry.create(&sid).await;

    // Per-connection channel for frames pushed by the change notifier.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);
    session.add_client(client_id, client_tx);

    let welcome = Frame::request("session:connected", Data::new()).with_session_id(sid.as_str());
    if send_frame(&mut socket, &welcome).await.is_err() {
        let _ = state.registry.destroy(&sid).await;
        return;
    }

    info!(%sid, %client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, &sid, &text).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // Tear down the session and its streaming channel. A session already
    // gone (double disconnect) is not an error.
    session.remove_client(client_id);
    match state.registry.destroy(&sid).await {
        Ok(()) => info!(%sid, "ws: session destroyed"),
        Err(e) => debug!(%sid, error = %e, "ws: session already gone"),
    }
    info!(%sid, %client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the
/// sender.
///
/// This keeps websocket transport concerns separate from frame handling,
/// so tests can exercise the full dispatch path without a socket.
async fn process_inbound_text(state: &AppState, sid: &str, text: &str) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(sid, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new())
                .with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    let prefix = req.prefix();
    info!(sid, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match prefix {
        "session" => handle_session(state, sid, &req).await,
        "project" => handle_project(state, sid, &req).await,
        "image" => handle_image(state, sid, &req).await,
        "dir" => handle_dir(&req),
        "angles" => handle_angles(state, sid, &req).await,
        "overlay" => handle_overlay(state, sid, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// SESSION HANDLERS
// =============================================================================

async fn handle_session(state: &AppState, sid: &str, req: &Frame) -> Result<Outcome, Frame> {
    match op_of(req) {
        "load" => match services::session::load_session(state, sid).await {
            Ok(port) => {
                let mut data = Data::new();
                data.insert("port".into(), serde_json::json!(port));
                Ok(Outcome::Reply(data))
            }
            Err(e) => Err(req.error_from(&e)),
        },
        op => Err(req.error(format!("unknown session op: {op}"))),
    }
}

async fn handle_project(state: &AppState, sid: &str, req: &Frame) -> Result<Outcome, Frame> {
    match op_of(req) {
        "load" => {
            let path = str_param(req, "path")?;
            let mut ticket = acquire_model(state, sid, req).await?;
            let Some(model) = ticket.model_mut() else {
                return Err(req.error_from(&ModelMissing));
            };
            model
                .load_project(Path::new(path))
                .map_err(|e: ModelError| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown project op: {op}"))),
    }
}

// =============================================================================
// IMAGE HANDLERS
// =============================================================================

async fn handle_image(state: &AppState, sid: &str, req: &Frame) -> Result<Outcome, Frame> {
    let op = op_of(req);

    let mut ticket = acquire_model(state, sid, req).await?;
    let Some(model) = ticket.model_mut() else {
        return Err(req.error_from(&ModelMissing));
    };

    let result = match op {
        "load" => {
            let path = str_param(req, "path")?;
            model.load_image(Path::new(path))
        }
        "load_next" => model.load_next_image(),
        "load_previous" => model.load_previous_image(),
        _ => return Err(req.error(format!("unknown image op: {op}"))),
    };

    result.map_err(|e: ImageError| req.error_from(&e))?;
    Ok(Outcome::Done)
}

// =============================================================================
// DIRECTORY HANDLER
// =============================================================================

/// Pure query: not session-scoped, not lock-guarded. A missing path is a
/// null result, never an error frame.
fn handle_dir(req: &Frame) -> Result<Outcome, Frame> {
    match op_of(req) {
        "list" => {
            let path = str_param(req, "path")?;
            let mut data = Data::new();
            match services::files::list_dir(Path::new(path)) {
                Some(listing) => {
                    data.insert("folders".into(), serde_json::json!(listing.folders));
                    data.insert("files".into(), serde_json::json!(listing.files));
                }
                None => {
                    data.insert("folders".into(), serde_json::Value::Null);
                    data.insert("files".into(), serde_json::Value::Null);
                }
            }
            Ok(Outcome::Reply(data))
        }
        op => Err(req.error(format!("unknown dir op: {op}"))),
    }
}

// =============================================================================
// GEOMETRY HANDLERS
// =============================================================================

async fn handle_angles(state: &AppState, sid: &str, req: &Frame) -> Result<Outcome, Frame> {
    let op = op_of(req);

    let ticket = acquire_model(state, sid, req).await?;
    let Some(model) = ticket.model() else {
        return Err(req.error_from(&ModelMissing));
    };

    let mut data = Data::new();
    match op {
        "image" => {
            let x = f64_param(req, "x")?;
            let y = f64_param(req, "y")?;
            match model.image_angles(x, y) {
                Some(angles) => {
                    data.insert("tth".into(), serde_json::json!(angles.tth));
                    data.insert("azi".into(), serde_json::json!(angles.azi));
                    data.insert("q".into(), serde_json::json!(angles.q));
                    data.insert("d".into(), serde_json::json!(angles.d));
                }
                None => {
                    for key in ["tth", "azi", "q", "d"] {
                        data.insert(key.into(), serde_json::Value::Null);
                    }
                }
            }
        }
        "pattern" => {
            let tth = f64_param(req, "tth")?;
            match model.pattern_angles(tth) {
                Some(angles) => {
                    data.insert("tth".into(), serde_json::json!(tth));
                    data.insert("q".into(), serde_json::json!(angles.q));
                    data.insert("d".into(), serde_json::json!(angles.d));
                }
                None => {
                    for key in ["tth", "q", "d"] {
                        data.insert(key.into(), serde_json::Value::Null);
                    }
                }
            }
        }
        "azimuthal_ring" => {
            let tth = f64_param(req, "tth")?;
            match model.azimuthal_ring(tth) {
                Some(ring) => {
                    data.insert("x".into(), serde_json::json!(ring.x));
                    data.insert("y".into(), serde_json::json!(ring.y));
                }
                None => {
                    data.insert("x".into(), serde_json::Value::Null);
                    data.insert("y".into(), serde_json::Value::Null);
                }
            }
        }
        _ => return Err(req.error(format!("unknown angles op: {op}"))),
    }
    Ok(Outcome::Reply(data))
}

// =============================================================================
// OVERLAY HANDLERS
// =============================================================================

async fn handle_overlay(state: &AppState, sid: &str, req: &Frame) -> Result<Outcome, Frame> {
    let op = op_of(req);

    // Resolve-and-mutate stays inside one ticket so concurrent overlay
    // commands can never act on a stale index.
    let mut ticket = acquire_model(state, sid, req).await?;
    let Some(model) = ticket.model_mut() else {
        return Err(req.error_from(&ModelMissing));
    };

    match op {
        "add_pattern" => {
            model.add_pattern_overlay();
            Ok(Outcome::Done)
        }
        "clear" => {
            model.clear_overlays();
            Ok(Outcome::Done)
        }
        "set_scaling" => {
            let index = index_param(req, "index")?;
            let scaling = f64_param(req, "scaling")?;
            model
                .set_overlay_scaling(index, scaling)
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        "set_offset" => {
            let index = index_param(req, "index")?;
            let offset = f64_param(req, "offset")?;
            model
                .set_overlay_offset(index, offset)
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        "get" => {
            let index = index_param(req, "index")?;
            let overlay = model.overlays().get(index).map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(overlay_data(overlay)))
        }
        "list" => {
            let overlays: Vec<serde_json::Value> = model
                .overlays()
                .all()
                .iter()
                .map(|o| serde_json::Value::Object(overlay_data(o).into_iter().collect()))
                .collect();
            let mut data = Data::new();
            data.insert("overlays".into(), serde_json::Value::Array(overlays));
            Ok(Outcome::Reply(data))
        }
        _ => Err(req.error(format!("unknown overlay op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn op_of(req: &Frame) -> &str {
    req.syscall.split_once(':').map_or("", |(_, op)| op)
}

/// Acquire the session's lock ticket, requiring a loaded model.
async fn acquire_model(state: &AppState, sid: &str, req: &Frame) -> Result<ModelTicket, Frame> {
    let ticket = state
        .registry
        .acquire(sid)
        .await
        .map_err(|e| req.error_from(&e))?;
    if ticket.model().is_none() {
        return Err(req.error_from(&ModelMissing));
    }
    Ok(ticket)
}

fn str_param<'a>(req: &'a Frame, key: &str) -> Result<&'a str, Frame> {
    req.data
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| req.error(format!("{key} required")))
}

fn f64_param(req: &Frame, key: &str) -> Result<f64, Frame> {
    req.data
        .get(key)
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| req.error(format!("{key} required")))
}

fn index_param(req: &Frame, key: &str) -> Result<usize, Frame> {
    req.data
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| req.error(format!("{key} required")))
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data.get("code").and_then(|v| v.as_str()).unwrap_or("-");
        let message = frame.data.get("message").and_then(|v| v.as_str()).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
