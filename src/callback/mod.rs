//! Callback Correlation
//!
//! Threads a session id through an outgoing sampling request's `_meta` so
//! that the reply, which arrives later on a generic entry point and carries
//! no identity of its own, can be routed back to the tenant that asked for
//! it. The reply handler is a pure function of the echoed `{sessionId, tag,
//! payload}` tuple plus an AuthContextStore lookup; nothing is captured
//! across the async boundary.

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::auth::{AuthContext, AuthContextStore};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::types::{
    CreateMessageParams, CreateMessageResult, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    SamplingContent, SamplingMessage, META_CALLBACK_TAG, META_PAYLOAD, META_SESSION_ID,
};
use crate::notify::{NotificationBroadcaster, ServerNotification};

/// Callback tag for the bundled publish-a-post action
pub const TAG_CREATE_POST: &str = "create_post";

/// A side-effecting action invoked when a callback's reply arrives.
///
/// Supplied by surrounding application code; the core only looks these up by
/// tag and invokes them with the recovered tenant credentials.
#[async_trait]
pub trait CallbackAction: Send + Sync {
    /// Run the action with the originating tenant's auth context, the
    /// payload echoed from the original request, and the generated text.
    async fn run(
        &self,
        auth: &AuthContext,
        payload: serde_json::Value,
        generated: &str,
    ) -> McpResult<serde_json::Value>;
}

/// Registry mapping callback tag -> action
#[derive(Default)]
pub struct ActionRegistry {
    actions: DashMap<String, Arc<dyn CallbackAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: DashMap::new(),
        }
    }

    /// Register an action under a tag, replacing any previous one
    pub fn register(&self, tag: impl Into<String>, action: Arc<dyn CallbackAction>) {
        self.actions.insert(tag.into(), action);
    }

    /// Look up an action by tag
    pub fn get(&self, tag: &str) -> Option<Arc<dyn CallbackAction>> {
        self.actions.get(tag).map(|a| a.clone())
    }
}

/// Correlates outgoing generate-content requests with their out-of-band
/// replies and dispatches the tagged side effect under the right identity.
pub struct CallbackCorrelator {
    auth_store: Arc<AuthContextStore>,
    broadcaster: Arc<NotificationBroadcaster>,
    actions: Arc<ActionRegistry>,
    next_id: AtomicU64,
}

impl CallbackCorrelator {
    pub fn new(
        auth_store: Arc<AuthContextStore>,
        broadcaster: Arc<NotificationBroadcaster>,
        actions: Arc<ActionRegistry>,
    ) -> Self {
        Self {
            auth_store,
            broadcaster,
            actions,
            next_id: AtomicU64::new(1),
        }
    }

    /// Issue a generate-content request on behalf of a session.
    ///
    /// Embeds the correlation tuple in `_meta`, pushes the request down the
    /// session's channel, and returns immediately; the reply arrives later
    /// via [`CallbackCorrelator::on_reply`].
    pub fn issue(
        &self,
        session_id: &str,
        tag: &str,
        payload: serde_json::Value,
    ) -> McpResult<u64> {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let prompt = build_prompt(tag, &payload);
        let mut params = CreateMessageParams {
            messages: vec![SamplingMessage {
                role: "user".to_string(),
                content: SamplingContent::Text { text: prompt },
            }],
            max_tokens: 1024,
            system_prompt: Some(
                "You draft concise, engaging social media posts. Reply with the post text only."
                    .to_string(),
            ),
            meta: Default::default(),
        };
        params
            .meta
            .insert(META_SESSION_ID.to_string(), serde_json::json!(session_id));
        params
            .meta
            .insert(META_CALLBACK_TAG.to_string(), serde_json::json!(tag));
        params.meta.insert(META_PAYLOAD.to_string(), payload);

        let request = JsonRpcRequest::new(
            "sampling/createMessage",
            Some(serde_json::to_value(&params)?),
            request_id,
        );

        match self
            .broadcaster
            .push_frame(session_id, JsonRpcMessage::Request(request))
        {
            crate::notify::Delivery::Delivered => {
                info!(
                    "Issued callback '{}' for session {} (request {})",
                    tag, session_id, request_id
                );
                Ok(request_id)
            }
            crate::notify::Delivery::Dropped => {
                Err(McpError::SessionNotFound(session_id.to_string()))
            }
        }
    }

    /// Process an inbound reply to a previously issued request.
    ///
    /// Recovers the correlation tuple from the echoed `_meta`, re-resolves
    /// the tenant's auth context, runs the tagged action, and notifies the
    /// originating session with the outcome. A reply for an evicted session
    /// is logged and dropped without invoking any action.
    pub async fn on_reply(&self, reply: JsonRpcResponse) -> McpResult<()> {
        if let Some(err) = reply.error {
            // Error replies carry no echoed metadata, so they cannot be
            // attributed to a tenant.
            warn!(
                "Generator returned error for request {:?}: {} ({})",
                reply.id, err.message, err.code
            );
            return Err(McpError::MissingCorrelation);
        }

        let result: CreateMessageResult = match reply.result {
            Some(value) => serde_json::from_value(value)?,
            None => return Err(McpError::InvalidRequest("reply has no result".to_string())),
        };

        let session_id = result
            .meta
            .get(META_SESSION_ID)
            .and_then(|v| v.as_str())
            .ok_or(McpError::MissingCorrelation)?
            .to_string();
        let tag = result
            .meta
            .get(META_CALLBACK_TAG)
            .and_then(|v| v.as_str())
            .ok_or(McpError::MissingCorrelation)?
            .to_string();
        let payload = result
            .meta
            .get(META_PAYLOAD)
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        debug!(
            "Reply {:?} correlates to session {} tag '{}'",
            reply.id, session_id, tag
        );

        // The session may have been evicted while the generator was working.
        let auth = match self.auth_store.get(&session_id) {
            Some(auth) => auth,
            None => {
                warn!(
                    "Undeliverable callback '{}': session {} no longer exists",
                    tag, session_id
                );
                return Err(McpError::UndeliverableCallback {
                    session_id,
                    reason: "session evicted before reply arrived".to_string(),
                });
            }
        };

        let action = match self.actions.get(&tag) {
            Some(action) => action,
            None => {
                // The tenant is still reachable, so report instead of drop.
                self.broadcaster.notify(
                    &session_id,
                    ServerNotification::CallbackFailed {
                        session_id: session_id.clone(),
                        tag: tag.clone(),
                        error: format!("no action registered for tag '{}'", tag),
                    },
                );
                return Err(McpError::UnknownCallbackTag(tag));
            }
        };

        let SamplingContent::Text { text: generated } = result.content;

        match action.run(&auth, payload, &generated).await {
            Ok(outcome) => {
                info!(
                    "Callback '{}' dispatched for session {} ({})",
                    tag,
                    session_id,
                    auth.display_handle()
                );
                self.broadcaster.notify(
                    &session_id,
                    ServerNotification::CallbackCompleted {
                        session_id: session_id.clone(),
                        tag,
                        result: outcome,
                    },
                );
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(
                    "Callback '{}' dispatch failed for session {}: {}",
                    tag, session_id, reason
                );
                self.broadcaster.notify(
                    &session_id,
                    ServerNotification::CallbackFailed {
                        session_id: session_id.clone(),
                        tag: tag.clone(),
                        error: reason.clone(),
                    },
                );
                Err(McpError::DispatchFailed { tag, reason })
            }
        }
    }
}

/// Build the generation prompt for a tag's payload
fn build_prompt(tag: &str, payload: &serde_json::Value) -> String {
    let title = payload.get("title").and_then(|v| v.as_str());
    let topic = payload.get("topic").and_then(|v| v.as_str());
    match (title, topic) {
        (Some(title), Some(topic)) => {
            format!("Draft a post titled \"{}\" about: {}", title, topic)
        }
        (Some(title), None) => format!("Draft a post titled \"{}\"", title),
        (None, Some(topic)) => format!("Draft a post about: {}", topic),
        (None, None) => format!("Draft content for the '{}' action", tag),
    }
}
