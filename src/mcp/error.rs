//! MCP Error Types
//!
//! Comprehensive error handling for the session and callback layers

use thiserror::Error;

use super::types::{error_codes, JsonRpcResponse};

/// MCP-specific errors
#[derive(Error, Debug)]
pub enum McpError {
    // Session resolution errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Session limit reached: {0}")]
    SessionLimitReached(usize),

    // Callback path errors
    #[error("Undeliverable callback for session {session_id}: {reason}")]
    UndeliverableCallback { session_id: String, reason: String },

    #[error("Callback dispatch failed for tag '{tag}': {reason}")]
    DispatchFailed { tag: String, reason: String },

    #[error("Unknown callback tag: {0}")]
    UnknownCallbackTag(String),

    #[error("Reply carries no correlation metadata")]
    MissingCorrelation,

    // Protocol errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    // Handler failures propagated unchanged to the caller
    #[error("Handler error: {0}")]
    Handler(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// JSON-RPC error code for this error
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            McpError::SessionNotFound(_) | McpError::AuthenticationRequired => {
                error_codes::INVALID_REQUEST
            }
            McpError::MethodNotFound(_) | McpError::ToolNotFound(_) => {
                error_codes::METHOD_NOT_FOUND
            }
            McpError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            McpError::InvalidRequest(_) | McpError::MissingCorrelation => {
                error_codes::INVALID_REQUEST
            }
            McpError::Serialization(_) => error_codes::PARSE_ERROR,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// HTTP status code for the transport layer
    pub fn http_status(&self) -> u16 {
        match self {
            McpError::SessionNotFound(_) => 404,
            McpError::AuthenticationRequired => 401,
            McpError::SessionLimitReached(_) => 429,
            McpError::InvalidRequest(_)
            | McpError::InvalidParams(_)
            | McpError::MissingCorrelation
            | McpError::Serialization(_) => 400,
            _ => 500,
        }
    }

    /// Render as a JSON-RPC error response for the given request id
    pub fn to_response(&self, id: serde_json::Value) -> JsonRpcResponse {
        JsonRpcResponse::error(id, self.json_rpc_code(), self.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Serialization(err.to_string())
    }
}

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
