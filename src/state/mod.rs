//! Shared application state.

pub mod registry;
pub mod room;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use axum::extract::ws::Message;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::services::engine::Command;

/// Handle over the application state, cloned into every handler.
pub type SharedState = Arc<AppState>;

/// Write half of one WebSocket connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Connection identity, assigned at upgrade time.
    pub id: Uuid,
    /// Channel into the connection's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// State shared between the HTTP layer, the gateway, and the engine.
pub struct AppState {
    connections: DashMap<Uuid, ConnectionHandle>,
    engine_tx: mpsc::UnboundedSender<Command>,
    room_count: AtomicUsize,
}

impl AppState {
    /// Build the shared state around the engine's command channel.
    pub fn new(engine_tx: mpsc::UnboundedSender<Command>) -> SharedState {
        Arc::new(Self {
            connections: DashMap::new(),
            engine_tx,
            room_count: AtomicUsize::new(0),
        })
    }

    /// Live connection registry.
    pub fn connections(&self) -> &DashMap<Uuid, ConnectionHandle> {
        &self.connections
    }

    /// Command channel into the engine task.
    pub fn engine(&self) -> &mpsc::UnboundedSender<Command> {
        &self.engine_tx
    }

    /// Serialize a payload and push it to one connection. Failures are logged
    /// and swallowed: a closed connection is handled by its own cleanup path.
    pub fn send_to<T: Serialize>(&self, connection: Uuid, payload: &T) {
        let Some(handle) = self.connections.get(&connection) else {
            return;
        };
        match serde_json::to_string(payload) {
            Ok(text) => {
                if handle.tx.send(Message::Text(text.into())).is_err() {
                    warn!(connection_id = %connection, "writer task gone; dropping message");
                }
            }
            Err(error) => {
                warn!(connection_id = %connection, %error, "failed to serialize outbound message");
            }
        }
    }

    /// Number of live rooms, as last published by the engine.
    pub fn room_count(&self) -> usize {
        self.room_count.load(Ordering::Relaxed)
    }

    /// Publish the live room count (engine only).
    pub fn set_room_count(&self, count: usize) {
        self.room_count.store(count, Ordering::Relaxed);
    }
}
