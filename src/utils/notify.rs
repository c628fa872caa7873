// src/utils/notify.rs

//! Fire-and-forget notifications to connected clients.
//!
//! A `Notifier` owns a broadcast channel and the registry of open
//! connections. Each SSE client holds a `Subscription`; dropping it (the
//! client went away) removes the connection from the registry.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::models::user::Role;

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub event: String,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub user_id: i64,
    pub role: Role,
    pub connected_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
    connections: Arc<RwLock<HashMap<Uuid, Connection>>>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Sends to whoever is listening. No listeners is not an error.
    pub fn publish(&self, event: &str, payload: serde_json::Value) {
        let delivered = self
            .sender
            .send(Notification {
                event: event.to_string(),
                payload,
                at: Utc::now(),
            })
            .unwrap_or(0);
        tracing::debug!(event, delivered, "Notification published");
    }

    pub fn subscribe(&self, user_id: i64, role: Role) -> Subscription {
        let id = Uuid::new_v4();
        self.connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                Connection {
                    user_id,
                    role,
                    connected_at: Utc::now(),
                },
            );
        tracing::debug!(connection = %id, user_id, "Client connected");

        Subscription {
            id,
            receiver: self.sender.subscribe(),
            connections: Arc::clone(&self.connections),
        }
    }

    /// Snapshot of the open connections.
    pub fn connected(&self) -> Vec<(Uuid, Connection)> {
        self.connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, c)| (*id, c.clone()))
            .collect()
    }
}

pub struct Subscription {
    id: Uuid,
    receiver: broadcast::Receiver<Notification>,
    connections: Arc<RwLock<HashMap<Uuid, Connection>>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next notification; `None` once the notifier is gone.
    /// A slow client that fell behind skips what it missed.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(n) => return Some(n),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(connection = %self.id, skipped, "Client lagged, notifications dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Notification> + Send {
        stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|n| (n, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
        tracing::debug!(connection = %self.id, "Client disconnected");
    }
}
