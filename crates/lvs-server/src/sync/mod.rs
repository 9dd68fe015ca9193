//! Server side of the sync channel.
//!
//! Connected browser tabs hold a websocket to [`WS_PATH`](lvs_protocol::WS_PATH).
//! Instructions queued through the [`ClientRegistry`] are delivered by each
//! client's connection task after the configured wait.

mod outbox;
mod registry;
mod websocket;

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use lvs_protocol::StatusResponse;

pub use registry::{ClientId, ClientRegistry, InstructionSender};
pub(crate) use websocket::ws_handler;

use crate::state::AppState;

/// Browser side of the sync channel.
pub(crate) const SYNC_SCRIPT: &str = include_str!("../../assets/sync.js");

/// Sync channel settings.
#[derive(Clone, Debug)]
pub struct SyncSettings {
    /// Delay applied to every outbound instruction.
    pub wait: Duration,
    /// Ask clients to forward their console output.
    pub remote_logs: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            wait: Duration::from_millis(100),
            remote_logs: false,
        }
    }
}

/// Readiness endpoint polled by clients before their first connection.
pub(crate) async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        ready: true,
        clients: state.clients.len(),
    })
}

/// Serve the browser script.
pub(crate) async fn script() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        SYNC_SCRIPT,
    )
}
