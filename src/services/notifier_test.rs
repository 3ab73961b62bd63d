use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use uuid::Uuid;

use super::*;
use crate::frame::Status;
use crate::registry::SessionRegistry;

const STREAM_PORT: u16 = 61555;

fn write_image(dir: &Path, name: &str) -> PathBuf {
    let data = Array2::from_elem((4, 4), 7.0f32);
    let path = dir.join(name);
    std::fs::write(&path, npy::encode(&data)).expect("write image fixture");
    path
}

/// A session with a wired model and one subscribed control client.
async fn wired_session(
    registry: &SessionRegistry,
    sid: &str,
) -> (Arc<Session>, Model, mpsc::Receiver<Frame>) {
    let session = registry.create(sid).await;
    let (tx, rx) = mpsc::channel(16);
    session.add_client(Uuid::new_v4(), tx);

    let mut model = Model::new();
    wire(&session, STREAM_PORT, &mut model);
    (session, model, rx)
}

async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn assert_no_frame(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no frame"
    );
}

// =============================================================================
// Image events
// =============================================================================

#[tokio::test]
async fn image_change_streams_binary_and_pushes_control_frame() {
    let registry = SessionRegistry::new();
    let (session, mut model, mut rx) = wired_session(&registry, "s1").await;
    let mut images = session.subscribe_images();

    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_image(dir.path(), "image_001.npy");
    model.load_image(&path).expect("load");

    // Binary payload on the streaming side, decodable back to the image.
    let bytes = timeout(Duration::from_millis(500), images.recv())
        .await
        .expect("image receive timed out")
        .expect("image channel closed");
    let decoded = npy::decode(&bytes).expect("valid NPY payload");
    assert_eq!(decoded, *model.image().data());

    // Lightweight control frame with the filename and the streaming port.
    let frame = recv_frame(&mut rx).await;
    assert_eq!(frame.syscall, "image:changed");
    assert_eq!(frame.status, Status::Request);
    assert_eq!(frame.session_id.as_deref(), Some("s1"));
    assert_eq!(
        frame.data.get("port").and_then(serde_json::Value::as_u64),
        Some(u64::from(STREAM_PORT))
    );
    let filename = frame.data.get("filename").and_then(|v| v.as_str()).expect("filename");
    assert!(filename.ends_with("image_001.npy"));
    assert!(!frame.data.contains_key("image"), "pixels never ride the control channel");
}

#[tokio::test]
async fn image_filenames_are_path_normalized() {
    let registry = SessionRegistry::new();
    let (_session, mut model, mut rx) = wired_session(&registry, "s1").await;

    // A backslash is a legal filename byte on Unix; the wire form must
    // still use forward slashes.
    let dir = tempfile::tempdir().expect("tempdir");
    write_image(dir.path(), r"scans\image_001.npy");
    let path = dir.path().join(r"scans\image_001.npy");
    model.load_image(&path).expect("load");

    let frame = recv_frame(&mut rx).await;
    let filename = frame.data.get("filename").and_then(|v| v.as_str()).expect("filename");
    assert!(filename.ends_with("scans/image_001.npy"));
    assert!(!filename.contains('\\'));
}

#[tokio::test]
async fn consecutive_image_changes_stream_in_order() {
    let registry = SessionRegistry::new();
    let (session, mut model, _rx) = wired_session(&registry, "s1").await;
    let mut images = session.subscribe_images();

    let dir = tempfile::tempdir().expect("tempdir");
    let first = write_image(dir.path(), "image_001.npy");
    let second = write_image(dir.path(), "image_002.npy");

    model.load_image(&first).expect("load first");
    model.load_image(&second).expect("load second");

    let a = images.recv().await.expect("first frame");
    let b = images.recv().await.expect("second frame");
    assert_eq!(npy::decode(&a).expect("a").dim(), (4, 4));
    assert_eq!(npy::decode(&b).expect("b").dim(), (4, 4));
    assert!(
        timeout(Duration::from_millis(80), images.recv()).await.is_err(),
        "exactly one binary frame per image change"
    );
}

// =============================================================================
// Pattern and overlay events
// =============================================================================

#[tokio::test]
async fn pattern_change_carries_plain_number_arrays() {
    let registry = SessionRegistry::new();
    let (_session, mut model, mut rx) = wired_session(&registry, "s1").await;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.json");
    std::fs::write(
        &path,
        r#"{"pattern": {"filename": "run_001.xy", "x": [0.1, 0.2], "y": [3.0, 4.0]}}"#,
    )
    .expect("write project");
    model.load_project(&path).expect("load project");

    let frame = recv_frame(&mut rx).await;
    assert_eq!(frame.syscall, "pattern:changed");
    assert_eq!(frame.data.get("filename").and_then(|v| v.as_str()), Some("run_001.xy"));
    assert_eq!(frame.data.get("x"), Some(&serde_json::json!([0.1, 0.2])));
    assert_eq!(frame.data.get("y"), Some(&serde_json::json!([3.0, 4.0])));
}

#[tokio::test]
async fn overlay_events_carry_their_documented_payloads() {
    let registry = SessionRegistry::new();
    let (_session, mut model, mut rx) = wired_session(&registry, "s1").await;

    model.add_pattern_overlay();
    let added = recv_frame(&mut rx).await;
    assert_eq!(added.syscall, "overlay:added");
    assert_eq!(added.data.get("name").and_then(|v| v.as_str()), Some("pattern"));
    assert!(added.data.contains_key("x"));
    assert!(added.data.contains_key("y"));
    assert!(added.data.contains_key("offset"));
    assert!(added.data.contains_key("scaling"));

    model.set_overlay_scaling(0, 2.5).expect("scaling");
    let changed = recv_frame(&mut rx).await;
    assert_eq!(changed.syscall, "overlay:changed");
    assert_eq!(changed.data.get("index").and_then(serde_json::Value::as_u64), Some(0));
    let overlay = changed.data.get("overlay").expect("full fields");
    assert_eq!(overlay.get("scaling").and_then(serde_json::Value::as_f64), Some(2.5));

    model.remove_overlay(0).expect("remove");
    let removed = recv_frame(&mut rx).await;
    assert_eq!(removed.syscall, "overlay:removed");
    assert_eq!(removed.data.get("index").and_then(serde_json::Value::as_u64), Some(0));
    assert!(!removed.data.contains_key("overlay"), "removal carries the index alone");
}

// =============================================================================
// Addressing
// =============================================================================

#[tokio::test]
async fn events_never_cross_session_boundaries() {
    let registry = SessionRegistry::new();
    let (_s1, mut model_1, mut rx_1) = wired_session(&registry, "s1").await;
    let (_s2, _model_2, mut rx_2) = wired_session(&registry, "s2").await;

    model_1.add_pattern_overlay();

    let frame = recv_frame(&mut rx_1).await;
    assert_eq!(frame.session_id.as_deref(), Some("s1"));
    assert_no_frame(&mut rx_2).await;
}

#[tokio::test]
async fn all_connections_of_one_session_receive_events() {
    let registry = SessionRegistry::new();
    let session = registry.create("s1").await;
    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    session.add_client(Uuid::new_v4(), tx_a);
    session.add_client(Uuid::new_v4(), tx_b);

    let mut model = Model::new();
    wire(&session, STREAM_PORT, &mut model);
    model.add_pattern_overlay();

    assert_eq!(recv_frame(&mut rx_a).await.syscall, "overlay:added");
    assert_eq!(recv_frame(&mut rx_b).await.syscall, "overlay:added");
}

#[tokio::test]
async fn destroyed_session_silences_its_notifier() {
    let registry = SessionRegistry::new();
    let (session, mut model, _rx) = wired_session(&registry, "s1").await;

    registry.reset().await;
    drop(session);

    // The weak handle no longer upgrades; the mutation must not panic.
    model.add_pattern_overlay();
    assert_eq!(model.overlays().len(), 1);
}
