//! Error types for the transport layer.

use std::io;

use protocol::ProtocolError;
use thiserror::Error;

use crate::session::SessionError;

/// Why a connection failed before streaming started.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The HTTP request could not be upgraded to a WebSocket.
    #[error("failed to upgrade connection")]
    UpgradeFailed,

    /// The request did not name a session.
    #[error("sid is required")]
    MissingIdentifier,

    /// The backend for a new session could not be created.
    #[error("{0}")]
    SessionCreation(SessionError),

    /// The session's backend has already exited.
    #[error("{0}")]
    SessionTerminated(SessionError),

    /// Another connection occupies the session.
    #[error("{0}")]
    OccupancyConflict(SessionError),

    /// Streaming ended abnormally.
    #[error("{0}")]
    Stream(#[from] StreamError),
}

/// Why a streaming connection ended.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The client sent a close frame.
    #[error("connection closed by client")]
    Closed,

    /// The client's message stream ended.
    #[error("end of stream")]
    EndOfStream,

    /// The connection was cancelled, usually by server shutdown or a failed
    /// sibling pump.
    #[error("cancelled")]
    Cancelled,

    /// The backing process exited.
    #[error("process exited")]
    ProcessExit,

    /// The client violated the frame protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Sending to the client failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Reading from the session failed.
    #[error("session I/O error: {0}")]
    Session(io::Error),

    /// The terminal could not be resized.
    #[error("{0}")]
    Resize(SessionError),
}

impl StreamError {
    /// Returns true for ordinary ways a connection ends.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            StreamError::Closed
                | StreamError::EndOfStream
                | StreamError::Cancelled
                | StreamError::ProcessExit
        )
    }
}
