//! JSON bodies exchanged alongside frames.

use serde::{Deserialize, Serialize};

/// Payload of a ResizeTerminal frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeMessage {
    /// Terminal width in columns.
    pub width: u16,
    /// Terminal height in rows.
    pub height: u16,
}

/// Error body, sent either as an HTTP response or as a text message over an
/// upgraded connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> String {
        // A struct with a single string field always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"error":""}"#))
    }
}

/// Response of the session removal entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub sid: String,
}
