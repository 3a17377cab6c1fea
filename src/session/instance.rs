//! Per-Session Protocol Handler
//!
//! One `McpInstance` exists per session, constructed with that session's
//! auth context captured by value. Every operation it dispatches acts with
//! the identity it was built with, even if the auth store is mutated or the
//! session is evicted while a request is in flight.

use log::{debug, trace};
use serde_json::json;

use crate::auth::AuthContext;
use crate::callback::{CallbackCorrelator, TAG_CREATE_POST};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::types::{
    InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ServerCapabilities,
    ServerInfo, ServerToolsCapability, Tool, ToolCallResult, ToolsListResult,
    MCP_PROTOCOL_VERSION,
};

use std::sync::Arc;

/// The per-session MCP request handler
pub struct McpInstance {
    session_id: String,
    /// Captured by value at construction; never re-read from the store
    auth: AuthContext,
    correlator: Arc<CallbackCorrelator>,
}

impl McpInstance {
    pub fn new(
        session_id: impl Into<String>,
        auth: AuthContext,
        correlator: Arc<CallbackCorrelator>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            auth,
            correlator,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Handle an inbound request and produce its response
    pub fn handle_request(&self, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        debug!(
            "Session {} handling '{}' (id: {:?})",
            self.session_id, request.method, request.id
        );

        let result = match request.method.as_str() {
            "initialize" => self.initialize()?,
            "ping" => json!({}),
            "tools/list" => serde_json::to_value(self.list_tools())?,
            "tools/call" => serde_json::to_value(self.call_tool(request.params.as_ref())?)?,
            other => return Err(McpError::MethodNotFound(other.to_string())),
        };

        Ok(JsonRpcResponse::success(request.id.clone(), result))
    }

    /// Handle an inbound notification (no response expected)
    pub fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                debug!("Session {} completed initialization", self.session_id);
            }
            other => {
                trace!("Session {} ignoring notification '{}'", self.session_id, other);
            }
        }
    }

    fn initialize(&self) -> McpResult<serde_json::Value> {
        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ServerToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: ServerInfo {
                name: "postbridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        Ok(serde_json::to_value(result)?)
    }

    fn list_tools(&self) -> ToolsListResult {
        ToolsListResult {
            tools: vec![
                Tool {
                    name: "draft_post".to_string(),
                    description: Some(
                        "Draft a social media post; the generated content is published \
                         with your account and the outcome arrives as a notification"
                            .to_string(),
                    ),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "title": {"type": "string"},
                            "topic": {"type": "string"},
                        },
                    }),
                },
                Tool {
                    name: "whoami".to_string(),
                    description: Some("Show the account this session acts as".to_string()),
                    input_schema: json!({"type": "object", "properties": {}}),
                },
            ],
        }
    }

    fn call_tool(&self, params: Option<&serde_json::Value>) -> McpResult<ToolCallResult> {
        let params = params.ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| McpError::InvalidParams("missing tool name".to_string()))?;
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        match name {
            "draft_post" => {
                let request_id =
                    self.correlator
                        .issue(&self.session_id, TAG_CREATE_POST, arguments)?;
                Ok(ToolCallResult::text(format!(
                    "Drafting started (request {}). The published result will arrive as a notification.",
                    request_id
                )))
            }
            "whoami" => Ok(ToolCallResult::text(format!(
                "Acting as {} (session {})",
                self.auth.display_handle(),
                self.session_id
            ))),
            other => Err(McpError::ToolNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthContextStore, AuthInfo};
    use crate::callback::ActionRegistry;
    use crate::notify::NotificationBroadcaster;
    use tokio::sync::broadcast;

    fn instance(session_id: &str) -> (McpInstance, broadcast::Receiver<crate::mcp::types::JsonRpcMessage>) {
        let auth_store = Arc::new(AuthContextStore::new());
        let broadcaster = Arc::new(NotificationBroadcaster::new());
        let (tx, rx) = broadcast::channel(16);
        broadcaster.register(session_id, tx);
        let correlator = Arc::new(CallbackCorrelator::new(
            auth_store,
            broadcaster,
            Arc::new(ActionRegistry::new()),
        ));
        let auth = AuthContext::new(session_id, AuthInfo::new("tok").with_handle("@me"));
        (McpInstance::new(session_id, auth, correlator), rx)
    }

    #[tokio::test]
    async fn test_initialize_and_tools_list() {
        let (inst, _rx) = instance("s1");

        let resp = inst
            .handle_request(&JsonRpcRequest::new("initialize", None, 1))
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "postbridge");

        let resp = inst
            .handle_request(&JsonRpcRequest::new("tools/list", None, 2))
            .unwrap();
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "draft_post");
    }

    #[tokio::test]
    async fn test_whoami_uses_captured_identity() {
        let (inst, _rx) = instance("s1");
        let resp = inst
            .handle_request(&JsonRpcRequest::new(
                "tools/call",
                Some(json!({"name": "whoami"})),
                3,
            ))
            .unwrap();
        let text = resp.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains("@me"));
        assert!(text.contains("s1"));
    }

    #[tokio::test]
    async fn test_draft_post_issues_sampling_request() {
        let (inst, mut rx) = instance("s1");
        let resp = inst
            .handle_request(&JsonRpcRequest::new(
                "tools/call",
                Some(json!({"name": "draft_post", "arguments": {"title": "x"}})),
                4,
            ))
            .unwrap();
        assert!(resp.result.is_some());

        let frame = rx.recv().await.unwrap();
        match frame {
            crate::mcp::types::JsonRpcMessage::Request(req) => {
                assert_eq!(req.method, "sampling/createMessage");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_method_and_tool() {
        let (inst, _rx) = instance("s1");
        let err = inst
            .handle_request(&JsonRpcRequest::new("resources/list", None, 5))
            .unwrap_err();
        assert!(matches!(err, McpError::MethodNotFound(_)));

        let err = inst
            .handle_request(&JsonRpcRequest::new(
                "tools/call",
                Some(json!({"name": "nope"})),
                6,
            ))
            .unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(_)));
    }
}
