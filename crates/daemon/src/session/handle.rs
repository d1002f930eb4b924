//! A registered session: one backend plus an occupancy flag.

use std::io;
use std::sync::{Mutex, PoisonError};

use super::backend::{Backend, ExitSignal, SessionError, SessionId};

/// A long-lived terminal session.
///
/// A session owns exactly one backend and outlives the connections that
/// drive it. At most one connection occupies it at a time; occupancy is
/// guarded by a per-session lock that never touches the registry.
pub struct Session {
    id: SessionId,
    backend: Box<dyn Backend>,
    occupied: Mutex<bool>,
}

impl Session {
    pub fn new(id: SessionId, backend: Box<dyn Backend>) -> Self {
        Self {
            id,
            backend,
            occupied: Mutex::new(false),
        }
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Marks the session occupied.
    ///
    /// Fails with [`SessionError::Occupied`] if another connection holds it.
    pub fn occupy(&self) -> Result<(), SessionError> {
        let mut occupied = self.occupied.lock().unwrap_or_else(PoisonError::into_inner);
        if *occupied {
            return Err(SessionError::Occupied(self.id.clone()));
        }
        *occupied = true;
        Ok(())
    }

    /// Clears the occupancy flag. Releasing an unoccupied session is a no-op.
    pub fn release(&self) {
        *self.occupied.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_occupied(&self) -> bool {
        *self.occupied.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads from the backend. No buffering happens at this layer.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.backend.read(buf).await
    }

    /// Writes to the backend, returning how many bytes it accepted.
    pub async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.backend.write(buf).await
    }

    /// Writes the whole buffer, looping over short writes.
    pub async fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.backend.write(buf).await? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }

    pub fn resize(&self, width: u16, height: u16) -> Result<(), SessionError> {
        self.backend.resize(width, height)
    }

    pub fn window_size(&self) -> Result<(u16, u16), SessionError> {
        self.backend.window_size()
    }

    pub fn exit_signal(&self) -> ExitSignal {
        self.backend.exit_signal()
    }

    /// Returns true once the backend has exited.
    pub fn is_terminated(&self) -> bool {
        self.backend.exit_signal().has_fired()
    }

    /// Terminates the backend.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.backend.close().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("occupied", &self.is_occupied())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
