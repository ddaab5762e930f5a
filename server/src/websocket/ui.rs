use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

use super::events::{UiCommand, UiEvent};
use crate::AppState;

/// Replies queued per client before commands are dropped.
const REPLY_QUEUE: usize = 8;

/// WebSocket endpoint for the scale's UI clients
pub async fn ui_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_ui_socket(socket, state))
}

async fn handle_ui_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the initial state so no change falls in between
    let mut events = state.ui_broadcast.subscribe();
    let (reply_tx, mut replies) = mpsc::channel::<UiEvent>(REPLY_QUEUE);

    let initial = UiEvent::InitialState {
        reader: state.engine.snapshot(),
        weight: super::weight_reading(&state),
        display: state.display.last_frame(),
    };
    if sender.send(Message::Text(initial.to_json().into())).await.is_err() {
        return;
    }
    tracing::debug!("UI client connected");

    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "UI client lagging, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(reply) = replies.recv() => reply,
            };
            if sender.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                if let Some(reply) = apply_command(&state, text.as_str()).await {
                    let _ = reply_tx.try_send(reply);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    tracing::debug!("UI client disconnected");
}

/// Run one client command. Returns an error event for the client on failure.
async fn apply_command(state: &AppState, text: &str) -> Option<UiEvent> {
    let command = match serde_json::from_str::<UiCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!(error = %e, "unrecognized UI command");
            return Some(UiEvent::Error {
                message: format!("unrecognized command: {e}"),
            });
        }
    };
    tracing::info!(?command, "UI command");
    match command {
        UiCommand::Tare => {
            state.engine.request_tare();
            None
        }
        UiCommand::SetAutoTare { enabled } => match state.engine.set_auto_tare(enabled).await {
            Ok(()) => None,
            Err(e) => Some(UiEvent::Error {
                message: e.to_string(),
            }),
        },
    }
}
