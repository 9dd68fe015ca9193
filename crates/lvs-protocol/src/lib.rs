//! Wire types shared by the lvs server, its browser script and native clients.
//!
//! - [`SyncInstruction`]: server → client messages on the sync channel
//! - [`ClientMessage`]: client → server messages on the sync channel
//! - [`WorkerTask`] / [`WorkerResult`]: worker pool payloads
//!
//! Server → client messages are either bare strings (`reload`, `refreshcss`,
//! `refreshcss-silent`, `connected`, `initRemoteLogs`) or a JSON object with
//! optional `navigate`, `body`, `hot`, `messages` and `message` fields.

mod client;
mod instruction;
mod worker;

pub use client::{ClientMessage, ConsoleLevel, ConsolePayload};
pub use instruction::SyncInstruction;
pub use worker::{CursorPosition, InitParams, ValidationIssue, WorkerReport, WorkerResult, WorkerTask};

use serde::{Deserialize, Serialize};

/// Route of the sync channel websocket.
pub const WS_PATH: &str = "/__lvs/ws";

/// Route of the readiness endpoint polled before the first connection.
pub const STATUS_PATH: &str = "/__lvs/status";

/// Route of the injected browser script.
pub const SCRIPT_PATH: &str = "/__lvs/sync.js";

/// Body returned by [`STATUS_PATH`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Whether the server accepts sync connections.
    pub ready: bool,
    /// Number of connected clients.
    #[serde(default)]
    pub clients: usize,
}

/// Protocol decoding error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Payload is not valid JSON or has the wrong shape.
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
    /// JSON object carried none of the known fields.
    #[error("message carries no instruction")]
    Empty,
    /// Bare word that is not a known instruction.
    #[error("unknown instruction: {0}")]
    Unknown(String),
}
