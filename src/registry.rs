//! Session registry with per-session mutual exclusion.
//!
//! DESIGN
//! ======
//! The registry owns the sid → session map behind its own short-held
//! `RwLock`; each session carries a separate FIFO mutex around its model
//! slot. Commands acquire a [`ModelTicket`] (an owned guard) for the whole
//! duration of their effect, so concurrent commands against one session
//! serialize while distinct sessions proceed in parallel. Waiters wake in
//! arrival order, and acquisition is bounded by [`LOCK_TIMEOUT`].
//!
//! LIFECYCLE
//! =========
//! A session exists from its connection's connect event until disconnect.
//! `destroy` stops the attached streaming channel and awaits its task;
//! `reset` deliberately skips that teardown (test isolation only).

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::frame::{ErrorCode, Frame};
use crate::model::Model;

/// Upper bound on waiting for a session's model lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered image frames per streaming subscription; slow consumers skip
/// ahead rather than stalling the producer.
const IMAGE_CHANNEL_CAPACITY: usize = 16;

/// How long `destroy` waits for a streaming task before aborting it.
const STREAM_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("session not found: {0:?}")]
    NotFound(String),
    #[error("timed out waiting for the session lock: {0:?}")]
    Timeout(String),
}

impl ErrorCode for RegistryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_SESSION_NOT_FOUND",
            Self::Timeout(_) => "E_LOCK_TIMEOUT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

// =============================================================================
// STREAMING CHANNEL DESCRIPTOR
// =============================================================================

/// Handle to one session's streaming subserver: the allocated port, the
/// stop signal, and the owning task.
pub struct StreamChannel {
    pub port: u16,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StreamChannel {
    #[must_use]
    pub fn new(port: u16, shutdown: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { port, shutdown, task }
    }

    /// Signal the subserver to stop and wait for its task to finish,
    /// aborting as a last resort.
    pub async fn stop(self) {
        let Self { port, shutdown, mut task } = self;
        let _ = shutdown.send(true);
        if tokio::time::timeout(STREAM_STOP_TIMEOUT, &mut task).await.is_err() {
            warn!(port, "streaming channel did not stop in time; aborting");
            task.abort();
        }
    }
}

// =============================================================================
// SESSION RECORD
// =============================================================================

/// One client's analysis context: the model slot (behind the per-session
/// lock), connected control clients, the image broadcast, and the optional
/// streaming channel.
pub struct Session {
    pub sid: String,
    pub created_at: SystemTime,
    slot: Arc<Mutex<Option<Model>>>,
    model_loaded: AtomicBool,
    clients: StdMutex<HashMap<Uuid, mpsc::Sender<Frame>>>,
    images: broadcast::Sender<Vec<u8>>,
    stream: StdMutex<Option<StreamChannel>>,
}

impl Session {
    fn new(sid: String) -> Self {
        let (images, _) = broadcast::channel(IMAGE_CHANNEL_CAPACITY);
        Self {
            sid,
            created_at: SystemTime::now(),
            slot: Arc::new(Mutex::new(None)),
            model_loaded: AtomicBool::new(false),
            clients: StdMutex::new(HashMap::new()),
            images,
            stream: StdMutex::new(None),
        }
    }

    /// Whether a model has been installed into this session.
    #[must_use]
    pub fn model_loaded(&self) -> bool {
        self.model_loaded.load(Ordering::Acquire)
    }

    pub fn add_client(&self, client_id: Uuid, tx: mpsc::Sender<Frame>) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client_id, tx);
    }

    pub fn remove_client(&self, client_id: Uuid) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&client_id);
    }

    /// Deliver a frame to every control connection of this session.
    /// Best-effort: a client with a full channel is skipped.
    pub fn deliver(&self, frame: &Frame) {
        let clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        for tx in clients.values() {
            let _ = tx.try_send(frame.clone());
        }
    }

    /// Publish one serialized image to all bound streaming connections.
    pub fn push_image(&self, bytes: Vec<u8>) {
        let _ = self.images.send(bytes);
    }

    /// Subscribe to this session's image stream.
    #[must_use]
    pub fn subscribe_images(&self) -> broadcast::Receiver<Vec<u8>> {
        self.images.subscribe()
    }

    /// Attach the streaming channel. A channel already in place wins; the
    /// caller checks `stream_port` first under the model ticket.
    pub fn attach_stream(&self, channel: StreamChannel) {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if stream.is_none() {
            *stream = Some(channel);
        }
    }

    #[must_use]
    pub fn stream_port(&self) -> Option<u16> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.port)
    }

    fn take_stream(&self) -> Option<StreamChannel> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

// =============================================================================
// LOCK TICKET
// =============================================================================

/// Scoped acquisition of one session's model slot. Holding the ticket
/// excludes every other command against the same session; dropping it
/// (on any path, including errors) releases the lock.
pub struct ModelTicket {
    session: Arc<Session>,
    guard: OwnedMutexGuard<Option<Model>>,
}

impl ModelTicket {
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub fn model(&self) -> Option<&Model> {
        self.guard.as_ref()
    }

    pub fn model_mut(&mut self) -> Option<&mut Model> {
        self.guard.as_mut()
    }

    /// Install a freshly created model into the session.
    pub fn install(&mut self, model: Model) {
        *self.guard = Some(model);
        self.session.model_loaded.store(true, Ordering::Release);
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Process-wide sid → session map.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session record if absent. Idempotent: re-creating an
    /// existing sid returns the existing record untouched.
    pub async fn create(&self, sid: &str) -> Arc<Session> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(sid.to_string())
            .or_insert_with(|| Arc::new(Session::new(sid.to_string())))
            .clone()
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown sid.
    pub async fn lookup(&self, sid: &str) -> Result<Arc<Session>, RegistryError> {
        self.sessions
            .read()
            .await
            .get(sid)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(sid.to_string()))
    }

    /// Remove a session and stop its streaming channel.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown sid; a second
    /// destroy of the same sid reports `NotFound` rather than crashing.
    pub async fn destroy(&self, sid: &str) -> Result<(), RegistryError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(sid)
            .ok_or_else(|| RegistryError::NotFound(sid.to_string()))?;
        if let Some(stream) = session.take_stream() {
            stream.stop().await;
        }
        Ok(())
    }

    /// Acquire the per-session lock, waiting in FIFO order behind other
    /// holders, bounded by [`LOCK_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown sid and
    /// [`RegistryError::Timeout`] when the bound elapses.
    pub async fn acquire(&self, sid: &str) -> Result<ModelTicket, RegistryError> {
        self.acquire_within(sid, LOCK_TIMEOUT).await
    }

    /// Internal: acquire with an explicit bound (exercised directly by
    /// timeout tests).
    pub(crate) async fn acquire_within(
        &self,
        sid: &str,
        bound: Duration,
    ) -> Result<ModelTicket, RegistryError> {
        let session = self.lookup(sid).await?;
        let slot = Arc::clone(&session.slot);
        let guard = tokio::time::timeout(bound, slot.lock_owned())
            .await
            .map_err(|_| RegistryError::Timeout(sid.to_string()))?;
        Ok(ModelTicket { session, guard })
    }

    /// Drop all sessions and lock state unconditionally, without running
    /// streaming-channel teardown. Test isolation only: callers own any
    /// streaming tasks still alive afterwards.
    pub async fn reset(&self) {
        self.sessions.write().await.clear();
    }

    pub async fn contains(&self, sid: &str) -> bool {
        self.sessions.read().await.contains_key(sid)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
