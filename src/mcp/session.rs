use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::mpsc;

use crate::configuration::McpSettings;

use super::codec::{Notification, Request};
use super::dispatcher::Dispatcher;
use super::error::SessionError;
use super::protocol::{JsonRpcResponse, RequestId};

/// Opaque session identifier, unique for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Opening,
    Ready,
    Draining,
    Closed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MCP Session state management.
///
/// Owns the sending half of both channels: the inbound queue feeding the
/// session's dispatch task and the outbound channel read by the event stream.
pub struct McpSession {
    id: SessionId,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    initialized: AtomicBool,
    inbound: Mutex<Option<mpsc::Sender<Request>>>,
    outbound: Mutex<Option<mpsc::Sender<JsonRpcResponse>>>,
    in_flight: Mutex<HashSet<RequestId>>,
}

impl McpSession {
    pub(crate) fn new(
        id: SessionId,
        inbound: mpsc::Sender<Request>,
        outbound: mpsc::Sender<JsonRpcResponse>,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            state: Mutex::new(SessionState::Opening),
            initialized: AtomicBool::new(false),
            inbound: Mutex::new(Some(inbound)),
            outbound: Mutex::new(Some(outbound)),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Time since the session was opened.
    pub fn lifetime(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Mark session as initialized
    pub fn set_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Check if session is initialized
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) -> bool {
        self.advance(SessionState::Ready)
    }

    fn advance(&self, to: SessionState) -> bool {
        let mut state = lock(&self.state);
        if to <= *state {
            return false;
        }
        tracing::debug!(session_id = %self.id, from = ?*state, to = ?to, "Session state change");
        *state = to;
        true
    }

    /// Stops accepting inbound requests. Queued and in-flight requests still
    /// run; the dispatch task finishes the teardown. Returns `false` when the
    /// session was already draining or closed.
    pub(crate) fn begin_drain(&self) -> bool {
        if !self.advance(SessionState::Draining) {
            return false;
        }
        lock(&self.inbound).take();
        true
    }

    /// Final transition, releases the outbound channel.
    pub(crate) fn finish(&self) {
        lock(&self.inbound).take();
        self.advance(SessionState::Closed);
        lock(&self.outbound).take();
        lock(&self.in_flight).clear();
    }

    fn inbound_sender(&self) -> Option<mpsc::Sender<Request>> {
        if self.state() != SessionState::Ready {
            return None;
        }
        lock(&self.inbound).clone()
    }

    /// Records a request as in flight. `false` if the id is already running.
    pub(crate) fn begin_request(&self, id: &RequestId) -> bool {
        lock(&self.in_flight).insert(id.clone())
    }

    pub(crate) fn end_request(&self, id: &RequestId) {
        lock(&self.in_flight).remove(id);
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Pushes a response onto the event stream. Returns `false` when the
    /// stream is gone and the response was dropped.
    pub async fn deliver(&self, response: JsonRpcResponse) -> bool {
        let sender = lock(&self.outbound).clone();
        let Some(sender) = sender else {
            tracing::debug!(session_id = %self.id, id = ?response.id, "Session closed, dropping response");
            return false;
        };

        match sender.send(response).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(response)) => {
                tracing::info!(
                    session_id = %self.id,
                    id = ?response.id,
                    "Event stream is gone, dropping response"
                );
                false
            }
        }
    }
}

impl fmt::Debug for McpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpSession")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("state", &self.state())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

type SessionTable = Arc<RwLock<HashMap<SessionId, Arc<McpSession>>>>;

/// Creates, routes to and tears down sessions. Each session gets its own
/// dispatch task, spawned on `open` and ended by `close`.
pub struct SessionManager {
    sessions: SessionTable,
    dispatcher: Arc<Dispatcher>,
    settings: McpSettings,
}

impl SessionManager {
    pub fn new(dispatcher: Arc<Dispatcher>, settings: McpSettings) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            dispatcher,
            settings,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Opens a session and returns it with the receiving end of its
    /// outbound channel. Must be called from within a tokio runtime.
    pub fn open(
        &self,
    ) -> Result<(Arc<McpSession>, mpsc::Receiver<JsonRpcResponse>), SessionError> {
        let (inbound_tx, inbound_rx) = mpsc::channel(self.settings.inbound_buffer.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(self.settings.outbound_buffer.max(1));
        let id = SessionId::new();
        let session = Arc::new(McpSession::new(id.clone(), inbound_tx, outbound_tx));

        {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            if sessions.contains_key(&id) {
                return Err(SessionError::IdCollision(id));
            }
            sessions.insert(id.clone(), Arc::clone(&session));
        }
        session.mark_ready();

        let sessions = Arc::clone(&self.sessions);
        let dispatcher = Arc::clone(&self.dispatcher);
        let task_session = Arc::clone(&session);
        let max_in_flight = self.settings.max_in_flight;
        tokio::spawn(async move {
            dispatcher
                .run(Arc::clone(&task_session), inbound_rx, max_in_flight)
                .await;
            sessions
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            tracing::info!(
                session_id = %id,
                lifetime_ms = task_session.lifetime().num_milliseconds(),
                "Session closed"
            );
        });

        tracing::info!(session_id = %session.id(), "Session opened");
        Ok((session, outbound_rx))
    }

    /// Fails with `UnknownSession` if the session is absent or closed.
    pub fn lookup(&self, id: &SessionId) -> Result<Arc<McpSession>, SessionError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .filter(|session| session.state() != SessionState::Closed)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))
    }

    /// Like `lookup`, but also rejects sessions that no longer accept input.
    pub fn accepting(&self, id: &SessionId) -> Result<Arc<McpSession>, SessionError> {
        let session = self.lookup(id)?;
        if session.state() != SessionState::Ready {
            return Err(SessionError::UnknownSession(id.clone()));
        }
        Ok(session)
    }

    /// Puts a request on the session's inbound queue.
    pub async fn route(&self, id: &SessionId, request: Request) -> Result<(), SessionError> {
        let sender = self
            .accepting(id)?
            .inbound_sender()
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))?;

        tracing::debug!(session_id = %id, id = %request.id, method = request.call.method(), "Routing request");
        sender
            .send(request)
            .await
            .map_err(|_| SessionError::UnknownSession(id.clone()))
    }

    pub fn notify(&self, id: &SessionId, notification: Notification) -> Result<(), SessionError> {
        let session = self.accepting(id)?;
        self.dispatcher.notify(&session, notification);
        Ok(())
    }

    /// Starts teardown of a session. Idempotent: only the first call for a
    /// given session does anything and returns `true`.
    pub fn close(&self, id: &SessionId) -> bool {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();

        match session {
            Some(session) if session.begin_drain() => {
                tracing::info!(
                    session_id = %id,
                    in_flight = session.in_flight(),
                    "Session draining"
                );
                true
            }
            _ => false,
        }
    }

    /// Number of sessions that are not yet closed.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
