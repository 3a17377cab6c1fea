//! Request Router
//!
//! Single entry point for every inbound frame. Resolves an existing session
//! from the caller-presented id, creates one for authenticated first
//! requests, and hands out-of-band replies to the callback correlator.
//! Handler failures pass through unchanged; a stale session id is surfaced
//! as an error, never masked by silently creating a new session.

use log::{debug, info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthInfo;
use crate::callback::CallbackCorrelator;
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::types::{JsonRpcMessage, JsonRpcResponse};
use crate::session::{InstanceFactory, SessionRegistry};

/// Outcome of routing one inbound frame
#[derive(Debug)]
pub enum Routed {
    /// A response to return, plus the freshly minted session id when this
    /// frame created a session
    Response {
        response: JsonRpcResponse,
        new_session_id: Option<String>,
    },
    /// Frame consumed without a response body (notification or reply)
    Accepted {
        new_session_id: Option<String>,
    },
}

/// Routes inbound frames to sessions and the callback correlator
pub struct RequestRouter {
    registry: SessionRegistry,
    factory: Arc<InstanceFactory>,
    correlator: Arc<CallbackCorrelator>,
}

impl RequestRouter {
    pub fn new(
        registry: SessionRegistry,
        factory: Arc<InstanceFactory>,
        correlator: Arc<CallbackCorrelator>,
    ) -> Self {
        Self {
            registry,
            factory,
            correlator,
        }
    }

    /// Handle one inbound frame.
    ///
    /// `session_id` is the caller-presented identifier, if any; `auth` is
    /// whatever the upstream middleware attached to this request.
    pub async fn handle(
        &self,
        message: JsonRpcMessage,
        session_id: Option<&str>,
        auth: Option<AuthInfo>,
    ) -> McpResult<Routed> {
        // Replies to server-initiated sampling requests carry their own
        // correlation; they are not dispatched to a session handler.
        if let JsonRpcMessage::Response(reply) = message {
            // Callback-path failures are resolved here: reported to the
            // tenant when reachable, otherwise logged and dropped. The
            // sender of the reply gets an acknowledgement either way.
            if let Err(e) = self.correlator.on_reply(reply).await {
                warn!("Callback reply not dispatched: {}", e);
            }
            return Ok(Routed::Accepted {
                new_session_id: None,
            });
        }

        match session_id {
            Some(id) => {
                let transport = self
                    .registry
                    .touch(id)
                    .ok_or_else(|| McpError::SessionNotFound(id.to_string()))?;
                debug!("Routing frame to session {}", id);
                match transport.handle(&message)? {
                    Some(response) => Ok(Routed::Response {
                        response,
                        new_session_id: None,
                    }),
                    None => Ok(Routed::Accepted {
                        new_session_id: None,
                    }),
                }
            }
            None => {
                let auth = auth.ok_or(McpError::AuthenticationRequired)?;

                let new_id = Uuid::new_v4().to_string();
                let transport = self.factory.build(&new_id, auth);
                self.registry.create(&new_id, transport.clone())?;
                info!("New session {} created for first request", new_id);

                match transport.handle(&message)? {
                    Some(response) => Ok(Routed::Response {
                        response,
                        new_session_id: Some(new_id),
                    }),
                    None => Ok(Routed::Accepted {
                        new_session_id: Some(new_id),
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContextStore;
    use crate::callback::ActionRegistry;
    use crate::mcp::types::JsonRpcRequest;
    use crate::notify::NotificationBroadcaster;
    use serde_json::json;
    use std::time::Duration;

    fn router() -> (RequestRouter, SessionRegistry, Arc<AuthContextStore>) {
        let auth_store = Arc::new(AuthContextStore::new());
        let broadcaster = Arc::new(NotificationBroadcaster::new());
        let correlator = Arc::new(CallbackCorrelator::new(
            auth_store.clone(),
            broadcaster.clone(),
            Arc::new(ActionRegistry::new()),
        ));
        let factory = Arc::new(InstanceFactory::new(auth_store.clone(), correlator.clone()));
        let registry = SessionRegistry::new(
            auth_store.clone(),
            broadcaster,
            16,
            Duration::from_secs(3600),
        );
        (
            RequestRouter::new(registry.clone(), factory, correlator),
            registry,
            auth_store,
        )
    }

    fn initialize_frame() -> JsonRpcMessage {
        JsonRpcMessage::Request(JsonRpcRequest::new("initialize", None, 1))
    }

    #[tokio::test]
    async fn test_first_request_creates_session() {
        let (router, registry, auth_store) = router();

        let routed = router
            .handle(initialize_frame(), None, Some(AuthInfo::new("tok-u1")))
            .await
            .unwrap();

        match routed {
            Routed::Response {
                response,
                new_session_id: Some(id),
            } => {
                assert!(response.result.is_some());
                assert!(registry.contains(&id));
                assert_eq!(auth_store.get(&id).unwrap().info.access_token, "tok-u1");
            }
            other => panic!("unexpected routing outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_auth_is_rejected() {
        let (router, registry, _) = router();

        let err = router
            .handle(initialize_frame(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::AuthenticationRequired));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected_not_recreated() {
        let (router, registry, _) = router();

        let err = router
            .handle(
                initialize_frame(),
                Some("does-not-exist"),
                Some(AuthInfo::new("tok")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::SessionNotFound(_)));
        // A stale id must never silently mint a replacement session.
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_existing_session_is_touched_and_served() {
        let (router, _registry, _) = router();

        let routed = router
            .handle(initialize_frame(), None, Some(AuthInfo::new("tok")))
            .await
            .unwrap();
        let id = match routed {
            Routed::Response { new_session_id, .. } => new_session_id.unwrap(),
            other => panic!("unexpected routing outcome: {:?}", other),
        };

        let routed = router
            .handle(
                JsonRpcMessage::Request(JsonRpcRequest::new("tools/list", None, 2)),
                Some(&id),
                None,
            )
            .await
            .unwrap();
        match routed {
            Routed::Response {
                response,
                new_session_id,
            } => {
                assert!(new_session_id.is_none());
                assert!(response.result.unwrap()["tools"].is_array());
            }
            other => panic!("unexpected routing outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_error_propagates_unchanged() {
        let (router, _registry, _) = router();

        let routed = router
            .handle(initialize_frame(), None, Some(AuthInfo::new("tok")))
            .await
            .unwrap();
        let id = match routed {
            Routed::Response { new_session_id, .. } => new_session_id.unwrap(),
            other => panic!("unexpected routing outcome: {:?}", other),
        };

        let err = router
            .handle(
                JsonRpcMessage::Request(JsonRpcRequest::new("bogus/method", None, 3)),
                Some(&id),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::MethodNotFound(_)));
    }

    #[tokio::test]
    async fn test_reply_frames_go_to_correlator() {
        let (router, _registry, _) = router();

        // An unattributable reply is consumed (logged and dropped), not
        // surfaced to the sender.
        let reply = JsonRpcMessage::Response(crate::mcp::types::JsonRpcResponse::success(
            json!(1),
            json!({"role": "assistant", "content": {"type": "text", "text": "hi"}}),
        ));
        let routed = router.handle(reply, None, None).await.unwrap();
        assert!(matches!(routed, Routed::Accepted { .. }));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let (router, _registry, auth_store) = router();

        let mut ids = Vec::new();
        for user in ["u1", "u2"] {
            let routed = router
                .handle(
                    initialize_frame(),
                    None,
                    Some(AuthInfo::new(format!("tok-{}", user))),
                )
                .await
                .unwrap();
            match routed {
                Routed::Response { new_session_id, .. } => ids.push(new_session_id.unwrap()),
                other => panic!("unexpected routing outcome: {:?}", other),
            }
        }

        assert_ne!(ids[0], ids[1]);
        assert_eq!(auth_store.get(&ids[0]).unwrap().info.access_token, "tok-u1");
        assert_eq!(auth_store.get(&ids[1]).unwrap().info.access_token, "tok-u2");
    }
}
