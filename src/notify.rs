//! Notification Broadcasting
//!
//! Routes server-initiated messages to exactly one session's client channel.
//! Delivery is best-effort: a notification for an evicted session is dropped,
//! because the client that would have received it is already gone.

use dashmap::DashMap;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::mcp::types::{JsonRpcMessage, JsonRpcNotification};

/// Typed notifications pushed to a session after callback processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerNotification {
    /// A callback's side-effecting action completed
    CallbackCompleted {
        session_id: String,
        tag: String,
        result: serde_json::Value,
    },

    /// A callback's side-effecting action failed
    CallbackFailed {
        session_id: String,
        tag: String,
        error: String,
    },
}

impl ServerNotification {
    /// Session this notification belongs to
    pub fn session_id(&self) -> &str {
        match self {
            Self::CallbackCompleted { session_id, .. } => session_id,
            Self::CallbackFailed { session_id, .. } => session_id,
        }
    }

    /// Render as a JSON-RPC notification frame for the wire
    pub fn to_frame(&self) -> JsonRpcNotification {
        let level = match self {
            Self::CallbackCompleted { .. } => "info",
            Self::CallbackFailed { .. } => "error",
        };
        JsonRpcNotification::new(
            "notifications/message",
            Some(serde_json::json!({
                "level": level,
                "logger": "postbridge",
                "data": self,
            })),
        )
    }
}

/// Outcome of a notify attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Pushed into the session's channel
    Delivered,
    /// No channel registered for that session; message discarded
    Dropped,
}

/// Maps session id -> that session's server-to-client channel.
///
/// Mutated only by session create/evict; read by the callback path.
#[derive(Default)]
pub struct NotificationBroadcaster {
    channels: Arc<DashMap<String, broadcast::Sender<JsonRpcMessage>>>,
}

impl NotificationBroadcaster {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
        }
    }

    /// Register a session's outbound channel for lookup
    pub fn register(&self, session_id: impl Into<String>, sender: broadcast::Sender<JsonRpcMessage>) {
        self.channels.insert(session_id.into(), sender);
    }

    /// Remove a session's channel (no-op if absent)
    pub fn unregister(&self, session_id: &str) {
        self.channels.remove(session_id);
    }

    /// True if a channel is registered for this session
    pub fn is_registered(&self, session_id: &str) -> bool {
        self.channels.contains_key(session_id)
    }

    /// Subscribe to a session's outbound stream (for the SSE endpoint)
    pub fn subscribe(&self, session_id: &str) -> Option<broadcast::Receiver<JsonRpcMessage>> {
        self.channels.get(session_id).map(|tx| tx.subscribe())
    }

    /// Push a typed notification to one session
    pub fn notify(&self, session_id: &str, notification: ServerNotification) -> Delivery {
        let frame = JsonRpcMessage::Notification(notification.to_frame());
        self.push_frame(session_id, frame)
    }

    /// Push a raw JSON-RPC frame (e.g. an outgoing sampling request) to one
    /// session's channel
    pub fn push_frame(&self, session_id: &str, frame: JsonRpcMessage) -> Delivery {
        match self.channels.get(session_id) {
            Some(tx) => {
                // A send error only means no subscriber is attached right
                // now; the session is still the addressee.
                if tx.send(frame).is_err() {
                    trace!("No active subscriber for session {}", session_id);
                }
                Delivery::Delivered
            }
            None => {
                debug!(
                    "Dropping message for unknown session {} (already evicted?)",
                    session_id
                );
                Delivery::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completed(session_id: &str) -> ServerNotification {
        ServerNotification::CallbackCompleted {
            session_id: session_id.to_string(),
            tag: "create_post".to_string(),
            result: json!({"ok": true}),
        }
    }

    #[tokio::test]
    async fn test_notify_reaches_only_target_session() {
        let broadcaster = NotificationBroadcaster::new();
        let (tx_a, mut rx_a) = broadcast::channel(16);
        let (tx_b, mut rx_b) = broadcast::channel(16);
        broadcaster.register("a", tx_a);
        broadcaster.register("b", tx_b);

        assert_eq!(broadcaster.notify("a", completed("a")), Delivery::Delivered);

        let frame = rx_a.recv().await.unwrap();
        match frame {
            JsonRpcMessage::Notification(n) => {
                let params = n.params.unwrap();
                assert_eq!(params["data"]["sessionId"], "a");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notify_unknown_session_drops() {
        let broadcaster = NotificationBroadcaster::new();
        assert_eq!(
            broadcaster.notify("ghost", completed("ghost")),
            Delivery::Dropped
        );
    }

    #[tokio::test]
    async fn test_unregister() {
        let broadcaster = NotificationBroadcaster::new();
        let (tx, _rx) = broadcast::channel(16);
        broadcaster.register("s1", tx);
        assert!(broadcaster.is_registered("s1"));

        broadcaster.unregister("s1");
        assert!(!broadcaster.is_registered("s1"));
        assert_eq!(broadcaster.notify("s1", completed("s1")), Delivery::Dropped);
    }
}
