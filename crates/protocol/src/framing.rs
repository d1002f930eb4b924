//! Frame codec for the terminal wire protocol.
//!
//! # Frame Format
//!
//! Every frame is a single text message on the duplex transport:
//! - 1 byte: ASCII tag (`'1'`, `'2'` or `'3'`)
//! - N bytes: payload
//!
//! The tag namespace is direction-dependent. Inbound (client → server) tags are
//! Input, ResizeTerminal and Ping; outbound (server → client) tags are Output,
//! Pong and Closed. Frames carry no sequence number; ordering comes from the
//! underlying transport.
//!
//! # Output encoding
//!
//! Output payloads are base64 (standard alphabet, padded) encodings of at most
//! [`OUTPUT_CHUNK_SIZE`] raw bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{ProtocolError, Result};
use crate::messages::ResizeMessage;

/// Inbound tag: user input, typically from a keyboard.
pub const TAG_INPUT: u8 = b'1';

/// Inbound tag: the client's terminal size changed.
pub const TAG_RESIZE_TERMINAL: u8 = b'2';

/// Inbound tag: liveness probe.
pub const TAG_PING: u8 = b'3';

/// Outbound tag: terminal output.
pub const TAG_OUTPUT: u8 = b'1';

/// Outbound tag: reply to a ping.
pub const TAG_PONG: u8 = b'2';

/// Outbound tag: the session has stopped streaming.
pub const TAG_CLOSED: u8 = b'3';

/// Maximum number of raw bytes carried by one Output frame.
pub const OUTPUT_CHUNK_SIZE: usize = 4096;

/// Literal payload of a Pong frame.
pub const PONG_PAYLOAD: &str = "pong";

/// Literal payload of a Closed frame.
pub const CLOSED_PAYLOAD: &str = "session closed";

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Raw bytes to write to the session. May be empty.
    Input(Vec<u8>),
    /// New terminal dimensions.
    ResizeTerminal(ResizeMessage),
    /// Ping; answered with [`OutboundFrame::Pong`].
    Ping,
}

impl InboundFrame {
    /// Decode an inbound frame from a raw message.
    ///
    /// An empty message or an unknown tag is a protocol error. A resize payload
    /// that is not a `{"width": int, "height": int}` object is a protocol error.
    pub fn decode(message: &[u8]) -> Result<Self> {
        let (&tag, payload) = message.split_first().ok_or(ProtocolError::EmptyFrame)?;

        match tag {
            TAG_INPUT => Ok(InboundFrame::Input(payload.to_vec())),
            TAG_RESIZE_TERMINAL => serde_json::from_slice::<ResizeMessage>(payload)
                .map(InboundFrame::ResizeTerminal)
                .map_err(|e| ProtocolError::InvalidResize(e.to_string())),
            TAG_PING => Ok(InboundFrame::Ping),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }

    /// Encode the frame as a text message. Used by clients and tests.
    ///
    /// Input that is not valid UTF-8 cannot travel in a text message and is
    /// rejected.
    pub fn encode(&self) -> Result<String> {
        let mut out = String::new();
        match self {
            InboundFrame::Input(data) => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| ProtocolError::InvalidInput(e.to_string()))?;
                out.push(TAG_INPUT as char);
                out.push_str(text);
            }
            InboundFrame::ResizeTerminal(resize) => {
                out.push(TAG_RESIZE_TERMINAL as char);
                out.push_str(&serde_json::to_string(resize)?);
            }
            InboundFrame::Ping => out.push(TAG_PING as char),
        }
        Ok(out)
    }
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Raw terminal output; base64-encoded on the wire.
    Output(Vec<u8>),
    /// Reply to a ping.
    Pong,
    /// Final frame of a stream.
    Closed,
}

impl OutboundFrame {
    /// Encode the frame as a text message.
    pub fn encode(&self) -> String {
        match self {
            OutboundFrame::Output(data) => {
                let mut out = String::with_capacity(1 + data.len().div_ceil(3) * 4);
                out.push(TAG_OUTPUT as char);
                STANDARD.encode_string(data, &mut out);
                out
            }
            OutboundFrame::Pong => format!("{}{}", TAG_PONG as char, PONG_PAYLOAD),
            OutboundFrame::Closed => format!("{}{}", TAG_CLOSED as char, CLOSED_PAYLOAD),
        }
    }

    /// Decode an outbound frame. Used by clients and tests.
    ///
    /// Pong and Closed payloads are not checked against their literals.
    pub fn decode(message: &str) -> Result<Self> {
        let (&tag, payload) = message
            .as_bytes()
            .split_first()
            .ok_or(ProtocolError::EmptyFrame)?;

        match tag {
            TAG_OUTPUT => Ok(OutboundFrame::Output(STANDARD.decode(payload)?)),
            TAG_PONG => Ok(OutboundFrame::Pong),
            TAG_CLOSED => Ok(OutboundFrame::Closed),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}
