//! Tenant Authentication
//!
//! Holds the external credential material each session needs to act on its
//! tenant's behalf. The token-exchange flow itself happens upstream; this
//! module only stores what the auth middleware hands us and makes it
//! recoverable by session id for the callback path.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque credential material supplied by the upstream auth middleware.
///
/// The core never inspects `access_token` beyond forwarding it to the
/// side-effect collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthInfo {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Account handle for logging and notifications (e.g. "@u1")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Free-form extra fields the middleware wants carried along
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

impl AuthInfo {
    /// Create from a bare access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            handle: None,
            extra: serde_json::Value::Null,
        }
    }

    /// Set the account handle
    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    /// Set an expiry timestamp
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at {
            Utc::now() >= expires_at
        } else {
            false
        }
    }
}

/// A session's authentication context: credential material plus the id of
/// the session it belongs to. Created strictly before its session and
/// removed in the same operation that destroys the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// Back-reference to the owning session (lookup key, not ownership)
    pub session_id: String,
    #[serde(flatten)]
    pub info: AuthInfo,
}

impl AuthContext {
    pub fn new(session_id: impl Into<String>, info: AuthInfo) -> Self {
        Self {
            session_id: session_id.into(),
            info,
        }
    }

    /// Handle for log lines, falling back to the session id
    pub fn display_handle(&self) -> &str {
        self.info.handle.as_deref().unwrap_or(&self.session_id)
    }
}

/// Process-wide store mapping session id -> authentication context.
///
/// Pure data holder; mutation happens only from session create/evict, reads
/// happen from the callback and notification paths.
#[derive(Default)]
pub struct AuthContextStore {
    contexts: Arc<DashMap<String, AuthContext>>,
}

impl AuthContextStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            contexts: Arc::new(DashMap::new()),
        }
    }

    /// Register or replace the context for a session
    pub fn set(&self, session_id: impl Into<String>, ctx: AuthContext) {
        self.contexts.insert(session_id.into(), ctx);
    }

    /// Look up the context for a session
    pub fn get(&self, session_id: &str) -> Option<AuthContext> {
        self.contexts.get(session_id).map(|c| c.clone())
    }

    /// Remove the context for a session (no-op if absent)
    pub fn remove(&self, session_id: &str) {
        self.contexts.remove(session_id);
    }

    /// Drop every stored context
    pub fn clear(&self) {
        self.contexts.clear();
    }

    /// Number of stored contexts
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// True if no contexts are stored
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Boundary trait for the upstream auth middleware collaborator.
///
/// The core never initiates the auth handshake; it only accepts whatever
/// material the resolver extracts from the initial request.
pub trait AuthResolver: Send + Sync {
    /// Extract credential material from request headers, if present
    fn resolve(&self, headers: &HeaderMap) -> Option<AuthInfo>;
}

/// Bearer-token resolver: reads `Authorization: Bearer <token>` and an
/// optional account handle header.
#[derive(Debug, Default)]
pub struct BearerResolver;

/// Optional header naming the tenant's account handle
pub const HANDLE_HEADER: &str = "X-Postbridge-Handle";

impl AuthResolver for BearerResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<AuthInfo> {
        let value = headers.get("Authorization")?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?.trim();
        if token.is_empty() {
            return None;
        }

        let mut info = AuthInfo::new(token);
        if let Some(handle) = headers.get(HANDLE_HEADER).and_then(|h| h.to_str().ok()) {
            info = info.with_handle(handle);
        }
        Some(info)
    }
}
