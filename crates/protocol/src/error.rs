//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering malformed or unexpected frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message arrived with no tag byte at all.
    #[error("empty message")]
    EmptyFrame,

    /// The tag byte does not name any known inbound frame.
    #[error("invalid message type: {0}")]
    UnknownTag(u8),

    /// The transport delivered a message kind the protocol does not carry
    /// (for example a binary message where text is expected).
    #[error("unsupported message kind: {0}")]
    UnsupportedMessage(&'static str),

    /// A resize payload could not be parsed.
    #[error("failed to unmarshal resize message: {0}")]
    InvalidResize(String),

    /// Input bytes that cannot be carried in a text message.
    #[error("input is not valid UTF-8: {0}")]
    InvalidInput(String),

    /// Failed to serialize a JSON body.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a JSON body.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Output payload was not valid base64.
    #[error("invalid output payload: {0}")]
    InvalidPayload(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<base64::DecodeError> for ProtocolError {
    fn from(err: base64::DecodeError) -> Self {
        ProtocolError::InvalidPayload(err.to_string())
    }
}
