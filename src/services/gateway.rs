//! Session gateway: one WebSocket connection per client.
//!
//! The gateway owns transport concerns only. It assigns each socket a
//! connection identity, parses inbound frames into [`ClientMessage`]s, and
//! forwards them to the engine; every game decision lives there.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientMessage, ServerMessage},
    services::engine::Command,
    state::{ConnectionHandle, SharedState},
};

/// Handle the full lifecycle of one client WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    state.connections().insert(
        connection_id,
        ConnectionHandle {
            id: connection_id,
            tx: outbound_tx.clone(),
        },
    );
    info!(connection_id = %connection_id, "client connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::Unknown) => {
                        warn!(connection_id = %connection_id, payload = %text, "ignoring unknown message type");
                    }
                    Ok(parsed) => {
                        if state
                            .engine()
                            .send(Command::Client {
                                connection: connection_id,
                                message: parsed,
                            })
                            .is_err()
                        {
                            warn!(connection_id = %connection_id, "engine is gone, closing connection");
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(connection_id = %connection_id, %error, "failed to parse client message");
                        send_message(&outbound_tx, &ServerMessage::Error {
                            message: "malformed message".into(),
                        });
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(connection_id = %connection_id, "client closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(error) => {
                warn!(connection_id = %connection_id, %error, "websocket error");
                break;
            }
        }
    }

    state.connections().remove(&connection_id);
    let _ = state.engine().send(Command::Disconnected {
        connection: connection_id,
    });
    info!(connection_id = %connection_id, "client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Serialize a payload and push it onto the connection's writer channel.
fn send_message<T: serde::Serialize>(tx: &mpsc::UnboundedSender<Message>, value: &T) {
    match serde_json::to_string(value) {
        Ok(payload) => {
            let _ = tx.send(Message::Text(payload.into()));
        }
        Err(error) => warn!(%error, "failed to serialize outbound message"),
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
