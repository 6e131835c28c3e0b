//! Named publish/subscribe channels backing the WebSocket info feeds.
//!
//! Grounded on the original `WebsocketBroadcast`: a process-wide registry
//! of named channels, each fanning a JSON message out to every connected
//! client. Built on [`tokio::sync::broadcast`] rather than a hand-rolled
//! client list, since every subscriber here is already a `Stream`
//! consumer (an actix WebSocket actor via `tokio_stream::wrappers::
//! BroadcastStream`).

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

const CHANNEL_CAPACITY: usize = 256;

/// One named broadcast channel.
pub struct Broadcaster {
    tx: broadcast::Sender<Value>,
}

impl Broadcaster {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Sends `content` to every currently-subscribed client, wrapped in
    /// the `{"request": ..., "content": ...}` envelope the original
    /// broadcaster used.
    pub fn broadcast(&self, request: &str, content: impl Serialize) {
        let envelope = serde_json::json!({
            "request": request,
            "content": content,
        });
        // No receivers isn't an error, it just means nobody is listening.
        let _ = self.tx.send(envelope);
    }

    /// Subscribes a new client, returning a receiver it can poll (or wrap
    /// in a `Stream`) until it disconnects.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }
}

/// Process-wide registry of named [`Broadcaster`]s.
#[derive(Default)]
pub struct BroadcastRegistry {
    channels: Mutex<HashMap<String, Arc<Broadcaster>>>,
}

impl BroadcastRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh channel under `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered; channel names are a
    /// fixed, known set decided at startup.
    pub async fn register(&self, name: &str) -> Arc<Broadcaster> {
        let mut channels = self.channels.lock().await;
        assert!(
            !channels.contains_key(name),
            "broadcast channel already registered: {name}",
        );
        let broadcaster = Arc::new(Broadcaster::new());
        channels.insert(name.to_string(), Arc::clone(&broadcaster));
        broadcaster
    }

    /// Looks up a previously-registered channel.
    pub async fn select(&self, name: &str) -> Option<Arc<Broadcaster>> {
        self.channels.lock().await.get(name).cloned()
    }
}

#[cfg(test)]
mod broadcast_spec {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_broadcast_messages() {
        let registry = BroadcastRegistry::new();
        let channel = registry.register("mobile_location").await;
        let mut rx = channel.subscribe();

        channel.broadcast("update", serde_json::json!({"name": "M1"}));

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg["request"], "update");
        assert_eq!(msg["content"]["name"], "M1");
    }

    #[tokio::test]
    async fn select_finds_a_registered_channel() {
        let registry = BroadcastRegistry::new();
        registry.register("mobile_location").await;
        assert!(registry.select("mobile_location").await.is_some());
        assert!(registry.select("unknown").await.is_none());
    }
}
