//! Session management module.
//!
//! Sessions are created on first access, shared by every connection that
//! names the same identifier, and destroyed only by explicit removal.
//!
//! - [`backend`]: the backend trait, exit signal and factory
//! - [`pty`]: the PTY-backed production backend
//! - [`handle`]: a session and its occupancy flag
//! - [`registry`]: the identifier to session map

pub mod backend;
pub mod handle;
pub mod pty;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backend, BackendFactory, ExitSignal, SessionError, SessionId};
pub use handle::Session;
pub use pty::{PtyBackend, PtyConfig, PtyFactory};
pub use registry::SessionRegistry;
