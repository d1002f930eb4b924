//! Per-connection driver: resolve, occupy, stream, release.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, Stream, StreamExt};
use protocol::{ErrorResponse, RemoveResponse};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::error::ConnectError;
use super::group::PumpGroup;
use super::pump::{self, SharedSink};
use crate::session::{BackendFactory, Session, SessionError, SessionRegistry};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// HTTP request received, not yet upgraded.
    Connecting,
    /// Upgraded to a WebSocket.
    Upgraded,
    /// Looking up or creating the session.
    Resolving,
    /// Claiming the session.
    Occupying,
    /// Pumps running.
    Streaming,
    /// Pumps finished; reporting and closing.
    Closing,
    /// Done.
    Closed,
    UpgradeFailed,
    MissingIdentifier,
    SessionCreateFailed,
    SessionTerminated,
    OccupyRejected,
}

impl ConnectionState {
    /// Returns true if no further transitions follow.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Closed
                | ConnectionState::UpgradeFailed
                | ConnectionState::MissingIdentifier
                | ConnectionState::SessionCreateFailed
                | ConnectionState::SessionTerminated
                | ConnectionState::OccupyRejected
        )
    }
}

/// Logs each state change of one connection.
pub(crate) struct StateTracker<'a> {
    sid: &'a str,
    state: ConnectionState,
}

impl<'a> StateTracker<'a> {
    pub(crate) fn new(sid: &'a str, state: ConnectionState) -> Self {
        tracing::debug!(session_id = %sid, state = ?state, "Connection state");
        Self { sid, state }
    }

    pub(crate) fn advance(&mut self, next: ConnectionState) {
        tracing::debug!(
            session_id = %self.sid,
            from = ?self.state,
            to = ?next,
            "Connection state changed"
        );
        self.state = next;
    }
}

/// Releases occupancy when the connection ends, however it ends.
struct Occupancy(Arc<Session>);

impl Drop for Occupancy {
    fn drop(&mut self) {
        self.0.release();
        tracing::debug!(session_id = %self.0.id(), "Released session");
    }
}

/// Connects clients to sessions.
///
/// Cheap to clone; clones share the registry, factory and shutdown token.
#[derive(Clone)]
pub struct TransportController {
    registry: Arc<SessionRegistry>,
    factory: Arc<dyn BackendFactory>,
    shutdown: CancellationToken,
}

impl TransportController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        factory: Arc<dyn BackendFactory>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            factory,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Drives an upgraded WebSocket for session `sid` until it ends.
    pub async fn connect(&self, sid: &str, socket: WebSocket) -> Result<(), ConnectError> {
        let (sink, stream) = socket.split();
        self.serve(sid, stream, Arc::new(Mutex::new(sink))).await
    }

    /// Drives an already-split connection. See [`TransportController::connect`].
    ///
    /// Failures before streaming are reported to the client as an error body
    /// and returned. After streaming starts, only unexpected terminations are
    /// reported and returned.
    pub async fn serve<St, E, Si>(
        &self,
        sid: &str,
        stream: St,
        sink: SharedSink<Si>,
    ) -> Result<(), ConnectError>
    where
        St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
        Si: Sink<Message> + Unpin + Send + 'static,
        Si::Error: Display,
    {
        let mut state = StateTracker::new(sid, ConnectionState::Upgraded);

        state.advance(ConnectionState::Resolving);
        let session = match self.registry.get_or_create(sid, Arc::clone(&self.factory)).await {
            Ok(session) => session,
            Err(e) => {
                state.advance(ConnectionState::SessionCreateFailed);
                return Err(reject(&sink, sid, ConnectError::SessionCreation(e)).await);
            }
        };

        if session.is_terminated() {
            state.advance(ConnectionState::SessionTerminated);
            let err = ConnectError::SessionTerminated(SessionError::Terminated(sid.to_string()));
            return Err(reject(&sink, sid, err).await);
        }

        state.advance(ConnectionState::Occupying);
        if let Err(e) = session.occupy() {
            state.advance(ConnectionState::OccupyRejected);
            return Err(reject(&sink, sid, ConnectError::OccupancyConflict(e)).await);
        }
        let _occupancy = Occupancy(Arc::clone(&session));

        state.advance(ConnectionState::Streaming);
        let mut group = PumpGroup::new(&self.shutdown);
        group.spawn(pump::inbound(
            Arc::clone(&session),
            stream,
            Arc::clone(&sink),
            group.token(),
        ))?;
        group.spawn(pump::outbound(
            Arc::clone(&session),
            Arc::clone(&sink),
            group.token(),
        ))?;
        let outcome = group.wait().await;

        state.advance(ConnectionState::Closing);
        let result = match outcome {
            Err(e) if !e.is_expected() => {
                tracing::error!(session_id = %sid, error = %e, "Connection terminated with error");
                send_error(&sink, sid, &e.to_string()).await;
                Err(ConnectError::Stream(e))
            }
            Err(reason) => {
                tracing::debug!(session_id = %sid, reason = %reason, "Connection finished");
                Ok(())
            }
            Ok(()) => Ok(()),
        };
        send_close(&sink, sid).await;

        state.advance(ConnectionState::Closed);
        result
    }

    /// Closes and unregisters session `sid`. Succeeds whether or not it existed.
    pub async fn remove(&self, sid: &str) -> RemoveResponse {
        if let Err(e) = self.registry.remove(sid).await {
            tracing::warn!(session_id = %sid, error = %e, "Session removed with close error");
        }
        RemoveResponse {
            sid: sid.to_string(),
        }
    }
}

/// Reports a pre-streaming failure and closes the socket.
async fn reject<Si>(sink: &Mutex<Si>, sid: &str, err: ConnectError) -> ConnectError
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    tracing::warn!(session_id = %sid, error = %err, "Rejecting connection");
    send_error(sink, sid, &err.to_string()).await;
    send_close(sink, sid).await;
    err
}

async fn send_error<Si>(sink: &Mutex<Si>, sid: &str, message: &str)
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let body = ErrorResponse::new(message).to_json();
    if let Err(e) = pump::send(sink, Message::Text(body)).await {
        tracing::debug!(session_id = %sid, error = %e, "Failed to send error body");
    }
}

async fn send_close<Si>(sink: &Mutex<Si>, sid: &str)
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    if let Err(e) = pump::send(sink, Message::Close(None)).await {
        tracing::debug!(session_id = %sid, error = %e, "Failed to send close frame");
    }
}
