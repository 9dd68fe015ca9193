//! WebSocket handler for the sync channel.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use lvs_protocol::{ClientMessage, ConsoleLevel, SyncInstruction};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::outbox::Outbox;
use super::registry::ClientId;
use crate::state::AppState;

/// Handle WebSocket upgrade for the sync channel.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle an established connection until either side closes it.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = state.clients.register(tx);

    if greet(&mut socket, state.sync.remote_logs).await.is_ok() {
        let mut outbox = Outbox::new(state.sync.wait);

        'connection: loop {
            tokio::select! {
                Some(instruction) = rx.recv() => outbox.push(instruction, Instant::now()),
                () = wait_until(outbox.next_deadline()) => {
                    for instruction in outbox.take_due(Instant::now()) {
                        if send(&mut socket, &instruction).await.is_err() {
                            break 'connection;
                        }
                    }
                }
                message = socket.recv() => match message {
                    Some(Ok(Message::Text(text))) => on_client_message(&state, id, text.as_str()),
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    state.clients.unregister(id);
}

async fn greet(socket: &mut WebSocket, remote_logs: bool) -> Result<(), axum::Error> {
    send(socket, &SyncInstruction::Connected).await?;
    if remote_logs {
        send(socket, &SyncInstruction::InitRemoteLogs).await?;
    }
    Ok(())
}

async fn send(socket: &mut WebSocket, instruction: &SyncInstruction) -> Result<(), axum::Error> {
    socket
        .send(Message::Text(instruction.to_wire().into()))
        .await
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Apply one inbound message. Malformed messages are dropped.
fn on_client_message(state: &AppState, id: ClientId, raw: &str) {
    match ClientMessage::from_wire(raw) {
        Ok(ClientMessage::File { file }) => {
            tracing::debug!(client = %id, %file, "Client announced file");
            state.clients.set_file(id, &file);
        }
        Ok(ClientMessage::Console { console }) => {
            if !state.sync.remote_logs {
                return;
            }
            let text = console.message.join(" ");
            match console.level {
                ConsoleLevel::Log => tracing::info!(target: "lvs::remote", client = %id, "{text}"),
                ConsoleLevel::Warn => tracing::warn!(target: "lvs::remote", client = %id, "{text}"),
                ConsoleLevel::Error => {
                    tracing::error!(target: "lvs::remote", client = %id, "{text}");
                }
            }
        }
        Err(e) => tracing::debug!(client = %id, error = %e, "Dropping malformed client message"),
    }
}
