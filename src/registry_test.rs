use std::sync::Mutex as StdMutex;

use tokio::time::{Duration, sleep, timeout};

use super::*;
use crate::frame::Data;
use crate::model::Model;

async fn acquire_guarded(registry: &SessionRegistry, sid: &str) -> ModelTicket {
    timeout(Duration::from_millis(500), registry.acquire(sid))
        .await
        .expect("acquire timed out")
        .expect("acquire failed")
}

#[tokio::test]
async fn create_is_idempotent() {
    let registry = SessionRegistry::new();
    let first = registry.create("s1").await;
    let second = registry.create("s1").await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len().await, 1);
    assert_eq!(first.sid, "s1");
    assert!(first.created_at <= SystemTime::now());
}

#[tokio::test]
async fn lookup_unknown_sid_fails() {
    let registry = SessionRegistry::new();
    assert!(matches!(registry.lookup("nope").await, Err(RegistryError::NotFound(_))));
}

#[tokio::test]
async fn destroy_removes_session_and_double_destroy_reports_not_found() {
    let registry = SessionRegistry::new();
    registry.create("s1").await;

    registry.destroy("s1").await.expect("first destroy");
    assert!(!registry.contains("s1").await);
    assert!(matches!(registry.destroy("s1").await, Err(RegistryError::NotFound(_))));
}

#[tokio::test]
async fn acquire_unknown_sid_fails() {
    let registry = SessionRegistry::new();
    assert!(matches!(registry.acquire("nope").await, Err(RegistryError::NotFound(_))));
}

#[tokio::test]
async fn install_marks_model_loaded() {
    let registry = SessionRegistry::new();
    let session = registry.create("s1").await;
    assert!(!session.model_loaded());

    let mut ticket = acquire_guarded(&registry, "s1").await;
    assert!(ticket.model().is_none());
    ticket.install(Model::new());
    assert!(ticket.model().is_some());
    assert!(session.model_loaded());
}

#[tokio::test]
async fn concurrent_commands_against_one_session_serialize() {
    let registry = Arc::new(SessionRegistry::new());
    registry.create("s1").await;
    let log: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

    let mut handles = Vec::new();
    for (start, end) in [("a-start", "a-end"), ("b-start", "b-end")] {
        let registry = Arc::clone(&registry);
        let log = Arc::clone(&log);
        handles.push(tokio::spawn(async move {
            let _ticket = registry.acquire("s1").await.expect("acquire");
            log.lock().unwrap().push(start);
            sleep(Duration::from_millis(30)).await;
            log.lock().unwrap().push(end);
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    // Critical sections never interleave: each start is immediately
    // followed by its own end.
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 4);
    assert_eq!(log[0].split('-').next(), log[1].split('-').next());
    assert_eq!(log[2].split('-').next(), log[3].split('-').next());
}

#[tokio::test]
async fn sessions_lock_independently() {
    let registry = SessionRegistry::new();
    registry.create("s1").await;
    registry.create("s2").await;

    let _held = acquire_guarded(&registry, "s1").await;
    // s2 is not blocked by s1's holder.
    let _other = acquire_guarded(&registry, "s2").await;
}

#[tokio::test]
async fn acquire_times_out_while_held() {
    let registry = SessionRegistry::new();
    registry.create("s1").await;

    let _held = acquire_guarded(&registry, "s1").await;
    let result = registry.acquire_within("s1", Duration::from_millis(50)).await;
    assert!(matches!(result, Err(RegistryError::Timeout(_))));
}

#[tokio::test]
async fn ticket_releases_on_drop_and_on_error_paths() {
    let registry = SessionRegistry::new();
    registry.create("s1").await;

    let held = acquire_guarded(&registry, "s1").await;
    drop(held);
    let again = acquire_guarded(&registry, "s1").await;
    drop(again);

    // An error inside the guarded region still releases the ticket.
    async fn failing_command(registry: &SessionRegistry) -> Result<(), RegistryError> {
        let _ticket = registry.acquire("s1").await?;
        Err(RegistryError::NotFound("simulated".into()))
    }
    assert!(failing_command(&registry).await.is_err());
    let _free = acquire_guarded(&registry, "s1").await;
}

#[tokio::test]
async fn reset_clears_all_sessions() {
    let registry = SessionRegistry::new();
    registry.create("s1").await;
    registry.create("s2").await;

    registry.reset().await;
    assert_eq!(registry.len().await, 0);
    assert!(matches!(registry.lookup("s1").await, Err(RegistryError::NotFound(_))));
}

#[tokio::test]
async fn deliver_reaches_only_own_session_clients() {
    let registry = SessionRegistry::new();
    let s1 = registry.create("s1").await;
    let s2 = registry.create("s2").await;

    let (tx1, mut rx1) = mpsc::channel(8);
    let (tx2, mut rx2) = mpsc::channel(8);
    s1.add_client(Uuid::new_v4(), tx1);
    s2.add_client(Uuid::new_v4(), tx2);

    s1.deliver(&Frame::request("pattern:changed", Data::new()));

    let received = timeout(Duration::from_millis(200), rx1.recv())
        .await
        .expect("s1 receive timed out")
        .expect("s1 channel closed");
    assert_eq!(received.syscall, "pattern:changed");
    assert!(
        timeout(Duration::from_millis(80), rx2.recv()).await.is_err(),
        "s2 must not receive s1's frames"
    );
}

#[tokio::test]
async fn deliver_skips_full_client_channels() {
    let registry = SessionRegistry::new();
    let s1 = registry.create("s1").await;
    let (tx, mut rx) = mpsc::channel(1);
    s1.add_client(Uuid::new_v4(), tx);

    s1.deliver(&Frame::request("overlay:added", Data::new()));
    s1.deliver(&Frame::request("overlay:added", Data::new()));

    assert!(rx.recv().await.is_some());
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "overflow frame should be dropped, not queued"
    );
}

#[tokio::test]
async fn stream_channel_stop_signals_and_joins() {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let _ = shutdown_rx.changed().await;
    });

    let channel = StreamChannel::new(61999, shutdown_tx, task);
    timeout(Duration::from_secs(1), channel.stop())
        .await
        .expect("stop should complete promptly");
}

#[tokio::test]
async fn image_subscription_sees_pushes_in_order() {
    let registry = SessionRegistry::new();
    let session = registry.create("s1").await;
    let mut rx = session.subscribe_images();

    session.push_image(vec![1]);
    session.push_image(vec![2]);

    assert_eq!(rx.recv().await.expect("first"), vec![1]);
    assert_eq!(rx.recv().await.expect("second"), vec![2]);
}
