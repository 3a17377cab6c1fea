//! Per-Session Duplex Channel
//!
//! Pairs a session's protocol handler with its server-to-client channel.
//! Inbound frames are dispatched to the handler; outbound frames
//! (notifications, sampling requests) flow through the broadcast sender
//! registered with the NotificationBroadcaster.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::instance::McpInstance;
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::types::{JsonRpcMessage, JsonRpcResponse};

/// Outbound channel capacity per session
const OUTBOUND_CAPACITY: usize = 256;

/// The duplex channel for one session's connection
#[derive(Clone)]
pub struct SessionTransport {
    instance: Arc<McpInstance>,
    outbound: broadcast::Sender<JsonRpcMessage>,
}

impl SessionTransport {
    /// Wrap a handler instance with a fresh outbound channel
    pub fn new(instance: Arc<McpInstance>) -> Self {
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);
        Self { instance, outbound }
    }

    pub fn session_id(&self) -> &str {
        self.instance.session_id()
    }

    /// Sender half for broadcast-lookup registration
    pub fn sender(&self) -> broadcast::Sender<JsonRpcMessage> {
        self.outbound.clone()
    }

    /// Subscribe to this session's server-to-client stream
    pub fn subscribe(&self) -> broadcast::Receiver<JsonRpcMessage> {
        self.outbound.subscribe()
    }

    /// Dispatch an inbound frame to the handler.
    ///
    /// Requests yield a response; notifications yield `None`. Replies never
    /// reach the transport (the router hands them to the correlator).
    pub fn handle(&self, message: &JsonRpcMessage) -> McpResult<Option<JsonRpcResponse>> {
        match message {
            JsonRpcMessage::Request(request) => {
                Ok(Some(self.instance.handle_request(request)?))
            }
            JsonRpcMessage::Notification(notification) => {
                self.instance.handle_notification(notification);
                Ok(None)
            }
            JsonRpcMessage::Response(_) => Err(McpError::InvalidRequest(
                "reply frames are not handled by the session transport".to_string(),
            )),
        }
    }
}
