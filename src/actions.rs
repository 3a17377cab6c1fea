//! Bundled Side-Effect Actions
//!
//! Stand-ins for the social-media backend at the collaborator boundary.
//! The core only ever sees these through the `CallbackAction` trait; real
//! deployments register their own.

use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use url::Url;

use crate::auth::AuthContext;
use crate::callback::CallbackAction;
use crate::mcp::error::{McpError, McpResult};

/// Publishes the generated post to a webhook endpoint, authenticated with
/// the tenant's own token.
pub struct WebhookPostAction {
    client: Client,
    endpoint: Url,
}

impl WebhookPostAction {
    pub fn new(endpoint: Url) -> McpResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| McpError::Internal(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl CallbackAction for WebhookPostAction {
    async fn run(
        &self,
        auth: &AuthContext,
        payload: serde_json::Value,
        generated: &str,
    ) -> McpResult<serde_json::Value> {
        let body = json!({
            "title": payload.get("title").cloned().unwrap_or(serde_json::Value::Null),
            "body": generated,
            "handle": auth.info.handle,
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&auth.info.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| McpError::Internal(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Internal(format!(
                "webhook returned {}",
                status
            )));
        }

        info!(
            "Published post for {} via webhook ({})",
            auth.display_handle(),
            status
        );
        Ok(json!({"status": "published", "code": status.as_u16()}))
    }
}

/// Logs the generated post and returns it; used when no webhook is
/// configured.
#[derive(Debug, Default)]
pub struct EchoPostAction;

#[async_trait]
impl CallbackAction for EchoPostAction {
    async fn run(
        &self,
        auth: &AuthContext,
        payload: serde_json::Value,
        generated: &str,
    ) -> McpResult<serde_json::Value> {
        info!(
            "Drafted post for {}: {}",
            auth.display_handle(),
            generated
        );
        Ok(json!({
            "status": "drafted",
            "title": payload.get("title").cloned().unwrap_or(serde_json::Value::Null),
            "body": generated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthInfo;

    #[tokio::test]
    async fn test_echo_action_returns_draft() {
        let auth = AuthContext::new("s1", AuthInfo::new("tok").with_handle("@u1"));
        let result = EchoPostAction
            .run(&auth, json!({"title": "x"}), "Hello world")
            .await
            .unwrap();
        assert_eq!(result["status"], "drafted");
        assert_eq!(result["title"], "x");
        assert_eq!(result["body"], "Hello world");
    }
}
