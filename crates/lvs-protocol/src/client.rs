//! Client → server messages.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Message sent by a client over the sync channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Registers the file the client is displaying.
    File {
        /// Path of the displayed file, relative to the served root.
        file: String,
    },
    /// Forwarded console output.
    Console {
        /// Console call captured in the page.
        console: ConsolePayload,
    },
}

/// Captured console call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolePayload {
    /// Console method that was called.
    #[serde(rename = "type")]
    pub level: ConsoleLevel,
    /// Stringified arguments.
    pub message: Vec<String>,
}

/// Console method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

impl ClientMessage {
    /// Decode a client message.
    pub fn from_wire(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Encode a client message.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
