//! # ttyweb Protocol Library
//!
//! Wire definitions shared by the ttyweb daemon and its clients.
//!
//! ## Overview
//!
//! A terminal connection is a WebSocket carrying text messages. Each message
//! is one frame: an ASCII tag byte followed by a payload.
//!
//! ```text
//! client ──► server    '1' Input            raw keystrokes
//!                      '2' ResizeTerminal   {"width": int, "height": int}
//!                      '3' Ping             (no payload)
//!
//! server ──► client    '1' Output           base64(≤ 4096 raw bytes)
//!                      '2' Pong             "pong"
//!                      '3' Closed           "session closed"
//! ```
//!
//! Failures outside the frame protocol are reported as JSON objects of the
//! form `{"error": "..."}`.
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{InboundFrame, OutboundFrame};
//!
//! let frame = InboundFrame::decode(b"1ls\n").unwrap();
//! assert_eq!(frame, InboundFrame::Input(b"ls\n".to_vec()));
//!
//! let text = OutboundFrame::Output(b"hi".to_vec()).encode();
//! assert_eq!(text, "1aGk=");
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: Frame tags and codecs
//! - [`messages`]: JSON bodies
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{
    InboundFrame, OutboundFrame, CLOSED_PAYLOAD, OUTPUT_CHUNK_SIZE, PONG_PAYLOAD, TAG_CLOSED,
    TAG_INPUT, TAG_OUTPUT, TAG_PING, TAG_PONG, TAG_RESIZE_TERMINAL,
};
pub use messages::{ErrorResponse, RemoveResponse, ResizeMessage};
