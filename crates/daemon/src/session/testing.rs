//! In-memory backend for unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::backend::{Backend, ExitSignal, SessionError};

#[derive(Default)]
struct MockState {
    buffer: VecDeque<u8>,
    width: u16,
    height: u16,
}

/// A loopback backend: bytes written are read back in order.
///
/// Reads block while the buffer is empty and return `Ok(0)` once closed.
pub(crate) struct MockBackend {
    state: Mutex<MockState>,
    readable: Notify,
    exited: CancellationToken,
    pub(crate) close_calls: Arc<AtomicUsize>,
    /// When set, `resize` fails.
    pub(crate) reject_resize: AtomicBool,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            readable: Notify::new(),
            exited: CancellationToken::new(),
            close_calls: Arc::new(AtomicUsize::new(0)),
            reject_resize: AtomicBool::new(false),
        }
    }

    pub(crate) fn size(&self) -> (u16, u16) {
        let state = self.state.lock().unwrap();
        (state.width, state.height)
    }

    /// Cancelling the returned token simulates the process exiting on its own.
    pub(crate) fn exit_token(&self) -> CancellationToken {
        self.exited.clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if !state.buffer.is_empty() {
                    let n = buf.len().min(state.buffer.len());
                    for (slot, byte) in buf.iter_mut().zip(state.buffer.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
            }
            if self.exited.is_cancelled() {
                return Ok(0);
            }
            tokio::select! {
                _ = self.readable.notified() => {}
                _ = self.exited.cancelled() => {}
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.exited.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "backend closed"));
        }
        self.state.lock().unwrap().buffer.extend(buf);
        self.readable.notify_one();
        Ok(buf.len())
    }

    fn resize(&self, width: u16, height: u16) -> Result<(), SessionError> {
        if self.reject_resize.load(Ordering::SeqCst) {
            return Err(SessionError::ResizeFailed("rejected".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.width = width;
        state.height = height;
        Ok(())
    }

    fn window_size(&self) -> Result<(u16, u16), SessionError> {
        Ok(self.size())
    }

    fn exit_signal(&self) -> ExitSignal {
        ExitSignal::new(self.exited.clone())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.exited.cancel();
        Ok(())
    }
}
