//! # ttyweb Daemon Library
//!
//! This crate provides the server side of ttyweb: terminal sessions backed by
//! pseudo-terminals, reachable from a browser over WebSocket.
//!
//! ## Overview
//!
//! - **Session Registry**: sessions keyed by a client-chosen identifier,
//!   created on first use and kept alive across reconnects
//! - **PTY Backend**: one child process per session on its own terminal
//! - **Transport Controller**: binds one WebSocket at a time to a session and
//!   pumps bytes in both directions
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   Daemon Orchestrator                    │
//! ├──────────────────────────────────────────────────────────┤
//! │  HTTP routes: {prefix}/ws  {prefix}/remove_session       │
//! │                          │                               │
//! │  ┌───────────────────────▼────────────────────────────┐  │
//! │  │               Transport Controller                 │  │
//! │  │        inbound pump         outbound pump          │  │
//! │  └───────────────────────┬────────────────────────────┘  │
//! │  ┌───────────────────────▼────────────────────────────┐  │
//! │  │    Session Registry  ──►  Session  ──►  PTY        │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut orchestrator = DaemonOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Sessions, the registry and the PTY backend
//! - [`transport`]: WebSocket connection handling
//! - [`server`]: HTTP routes
//! - [`orchestrator`]: Main daemon coordinator

pub mod config;
pub mod orchestrator;
pub mod server;
pub mod session;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{
    Backend, BackendFactory, PtyBackend, PtyConfig, PtyFactory, Session, SessionError, SessionId,
    SessionRegistry,
};

// Re-export transport types for convenience
pub use transport::{ConnectError, ConnectionState, StreamError, TransportController};

// Re-export server types for convenience
pub use server::create_router;

// Re-export orchestrator types for convenience
pub use orchestrator::{DaemonOrchestrator, OrchestratorEvent, OrchestratorState};
