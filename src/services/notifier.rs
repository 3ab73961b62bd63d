//! ChangeNotifier — bridges model change hooks to addressed outbound
//! messages.
//!
//! DESIGN
//! ======
//! One observer closure per session, registered first on the model's
//! observer list at session load so network delivery is never starved by
//! later observers of the same mutation. Every frame is delivered only to
//! the owning session's control connections; image payloads go out on the
//! session's streaming channel instead of the control channel.
//!
//! Delivery is fire-and-forget: `try_send` on the control side, broadcast
//! on the streaming side. A slow consumer never blocks the mutator.
//!
//! The closure holds a `Weak` session handle so a destroyed session's
//! model (and its captured observer) cannot keep the record alive.

use std::sync::{Arc, Weak};

use crate::frame::{Data, Frame};
use crate::model::overlay::Overlay;
use crate::model::{Model, ModelEvent};
use crate::npy;
use crate::registry::Session;

/// Wire the change-notification bridge between a model and its session.
/// Must be called before any other observer is registered.
pub fn wire(session: &Arc<Session>, stream_port: u16, model: &mut Model) {
    let weak: Weak<Session> = Arc::downgrade(session);
    model.observe(move |model, event| {
        let Some(session) = weak.upgrade() else {
            return;
        };
        dispatch(&session, stream_port, model, event);
    });
}

fn dispatch(session: &Session, stream_port: u16, model: &Model, event: ModelEvent) {
    match event {
        ModelEvent::ImageChanged => {
            session.push_image(npy::encode(model.image().data()));
            let frame = Frame::request("image:changed", Data::new())
                .with_session_id(session.sid.as_str())
                .with_data("filename", normalize_path(model.image().filename()))
                .with_data("port", stream_port);
            session.deliver(&frame);
        }
        ModelEvent::PatternChanged => {
            let pattern = model.pattern();
            let frame = Frame::request("pattern:changed", Data::new())
                .with_session_id(session.sid.as_str())
                .with_data("filename", pattern.filename())
                .with_data("x", pattern.pattern().x.clone())
                .with_data("y", pattern.pattern().y.clone());
            session.deliver(&frame);
        }
        ModelEvent::OverlayAdded => {
            let Some(overlay) = model.overlays().all().last() else {
                return;
            };
            let frame = Frame::request("overlay:added", overlay_data(overlay))
                .with_session_id(session.sid.as_str());
            session.deliver(&frame);
        }
        ModelEvent::OverlayChanged(index) => {
            let Ok(overlay) = model.overlays().get(index) else {
                return;
            };
            let frame = Frame::request("overlay:changed", Data::new())
                .with_session_id(session.sid.as_str())
                .with_data("index", index)
                .with_data("overlay", serde_json::Value::Object(
                    overlay_data(overlay).into_iter().collect(),
                ));
            session.deliver(&frame);
        }
        ModelEvent::OverlayRemoved(index) => {
            let frame = Frame::request("overlay:removed", Data::new())
                .with_session_id(session.sid.as_str())
                .with_data("index", index);
            session.deliver(&frame);
        }
    }
}

/// Full field payload for one overlay.
pub(crate) fn overlay_data(overlay: &Overlay) -> Data {
    let mut data = Data::new();
    data.insert("name".into(), serde_json::json!(overlay.name));
    data.insert("x".into(), serde_json::json!(overlay.x));
    data.insert("y".into(), serde_json::json!(overlay.y));
    data.insert("offset".into(), serde_json::json!(overlay.offset));
    data.insert("scaling".into(), serde_json::json!(overlay.scaling));
    data
}

/// Image filenames go out with forward slashes regardless of host OS.
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
#[path = "notifier_test.rs"]
mod tests;
