//! Transport layer: binds WebSocket connections to sessions.
//!
//! Each connection resolves its session through the registry, takes
//! exclusive occupancy, then runs two pumps until either side stops:
//!
//! ```text
//! socket ──inbound──► session ──► process
//! socket ◄─outbound── session ◄── process
//! ```
//!
//! - [`controller`]: connection lifecycle and the remove entry point
//! - [`pump`]: the inbound and outbound pumps
//! - [`group`]: fail-fast task group running the pumps
//! - [`error`]: connection and stream errors

pub mod controller;
pub mod error;
pub mod group;
pub mod pump;

pub use controller::{ConnectionState, TransportController};
pub use error::{ConnectError, StreamError};
pub use group::PumpGroup;
