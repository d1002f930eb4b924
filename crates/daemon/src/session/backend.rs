//! Backend abstraction shared by sessions.
//!
//! A backend is a process-like resource that a session multiplexes to
//! connections: a byte stream in each direction, a resizable terminal, and a
//! one-shot exit signal. [`PtyBackend`](super::pty::PtyBackend) is the
//! production implementation.

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Unique identifier for a session, supplied by the client.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Failed to spawn the backend process.
    #[error("failed to create session io: {0}")]
    SpawnFailed(String),

    /// The session already has an occupant.
    #[error("session is occupied: {0}")]
    Occupied(SessionId),

    /// The backend has exited; the session can no longer be driven.
    #[error("session already terminated: {0}")]
    Terminated(SessionId),

    /// Failed to resize the terminal.
    #[error("failed to resize terminal: {0}")]
    ResizeFailed(String),

    /// Failed to deliver the kill signal.
    #[error("failed to kill session: {0}")]
    KillFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One-shot broadcast fired when a backend terminates.
///
/// Any number of holders may check or await it, before or after it fires.
/// Holders cannot fire it; only the backend that created the underlying
/// token can.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    token: CancellationToken,
}

impl ExitSignal {
    /// Wrap a token owned by a backend. Cancelling the token fires the signal.
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Returns true once the backend has exited.
    pub fn has_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until the backend has exited. Returns immediately if it already has.
    pub async fn fired(&self) {
        self.token.cancelled().await
    }
}

/// A terminal-capable resource driven by a session.
///
/// `read` and `write` may be called concurrently from different tasks.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Reads up to `buf.len()` bytes. Blocks until data is available or the
    /// backend exits; `Ok(0)` means end of stream.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes bytes, returning how many were accepted.
    async fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Resizes the terminal to `width` columns by `height` rows.
    fn resize(&self, width: u16, height: u16) -> Result<(), SessionError>;

    /// Returns the current terminal size as `(width, height)`.
    fn window_size(&self) -> Result<(u16, u16), SessionError>;

    /// Returns the backend's exit signal.
    fn exit_signal(&self) -> ExitSignal;

    /// Terminates the backend and waits until its exit signal has fired.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Constructs backends for new sessions.
pub trait BackendFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Backend>, SessionError>;
}

impl<F> BackendFactory for F
where
    F: Fn() -> Result<Box<dyn Backend>, SessionError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn Backend>, SessionError> {
        self()
    }
}
