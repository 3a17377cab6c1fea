//! HTTP Surface
//!
//! Streamable HTTP endpoint wiring: POST carries JSON-RPC frames in, GET
//! attaches an SSE stream for server-to-client frames, DELETE tears a
//! session down, and a status route exposes the session summaries. All
//! shared components are explicit state handles; no globals.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use log::debug;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tower_http::cors::CorsLayer;

use crate::auth::AuthResolver;
use crate::mcp::error::McpError;
use crate::mcp::types::{JsonRpcMessage, SESSION_ID_HEADER};
use crate::notify::NotificationBroadcaster;
use crate::router::{RequestRouter, Routed};
use crate::session::SessionRegistry;

/// Shared handles for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<RequestRouter>,
    pub registry: SessionRegistry,
    pub broadcaster: Arc<NotificationBroadcaster>,
    pub resolver: Arc<dyn AuthResolver>,
}

/// Build the axum router over the shared state
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/mcp",
            get(attach_stream).post(handle_frame).delete(close_session),
        )
        .route("/status/sessions", get(session_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Render an McpError as an HTTP response with a JSON-RPC error body
fn error_response(err: &McpError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = err.to_response(serde_json::Value::Null);
    (status, Json(body)).into_response()
}

/// POST /mcp — the single inbound entry point
async fn handle_frame(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let session_id = session_header(&headers);
    let auth = state.resolver.resolve(&headers);

    let message: JsonRpcMessage = match serde_json::from_value(body) {
        Ok(message) => message,
        Err(e) => {
            return error_response(&McpError::InvalidRequest(format!(
                "not a JSON-RPC frame: {}",
                e
            )))
        }
    };

    match state
        .router
        .handle(message, session_id.as_deref(), auth)
        .await
    {
        Ok(Routed::Response {
            response,
            new_session_id,
        }) => {
            let mut http = Json(response).into_response();
            attach_session_header(&mut http, new_session_id);
            http
        }
        Ok(Routed::Accepted { new_session_id }) => {
            let mut http = StatusCode::ACCEPTED.into_response();
            attach_session_header(&mut http, new_session_id);
            http
        }
        Err(e) => error_response(&e),
    }
}

fn attach_session_header(response: &mut Response, new_session_id: Option<String>) {
    if let Some(id) = new_session_id {
        if let Ok(value) = HeaderValue::from_str(&id) {
            response.headers_mut().insert(SESSION_ID_HEADER, value);
        }
    }
}

/// GET /mcp — SSE stream of server-to-client frames for one session
async fn attach_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    let session_id = session_header(&headers).ok_or_else(|| {
        error_response(&McpError::InvalidRequest(format!(
            "missing {} header",
            SESSION_ID_HEADER
        )))
    })?;

    let rx = state
        .broadcaster
        .subscribe(&session_id)
        .ok_or_else(|| error_response(&McpError::SessionNotFound(session_id.clone())))?;

    debug!("SSE stream attached for session {}", session_id);

    let stream = BroadcastStream::new(rx).filter_map(|item| {
        let frame = item.ok()?;
        let data = serde_json::to_string(&frame).ok()?;
        Some(Ok(Event::default().event("message").data(data)))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// DELETE /mcp — explicit session teardown
async fn close_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return error_response(&McpError::InvalidRequest(format!(
            "missing {} header",
            SESSION_ID_HEADER
        )));
    };

    if !state.registry.contains(&session_id) {
        return error_response(&McpError::SessionNotFound(session_id));
    }

    state.registry.evict(&session_id);
    StatusCode::NO_CONTENT.into_response()
}

/// GET /status/sessions — monitoring surface
async fn session_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "count": state.registry.count(),
        "sessions": state.registry.list(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthContextStore, BearerResolver};
    use crate::callback::{ActionRegistry, CallbackCorrelator};
    use crate::session::InstanceFactory;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn app() -> Router {
        let auth_store = Arc::new(AuthContextStore::new());
        let broadcaster = Arc::new(NotificationBroadcaster::new());
        let correlator = Arc::new(CallbackCorrelator::new(
            auth_store.clone(),
            broadcaster.clone(),
            Arc::new(ActionRegistry::new()),
        ));
        let factory = Arc::new(InstanceFactory::new(auth_store.clone(), correlator.clone()));
        let registry = SessionRegistry::new(
            auth_store,
            broadcaster.clone(),
            16,
            Duration::from_secs(3600),
        );
        let router = Arc::new(RequestRouter::new(
            registry.clone(),
            factory,
            correlator,
        ));
        build_router(AppState {
            router,
            registry,
            broadcaster,
            resolver: Arc::new(BearerResolver),
        })
    }

    fn initialize_body() -> Body {
        Body::from(
            serde_json::to_vec(&json!({
                "jsonrpc": "2.0",
                "method": "initialize",
                "id": 1,
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_first_post_mints_session_header() {
        let app = app();
        let response = app
            .oneshot(
                Request::post("/mcp")
                    .header("Content-Type", "application/json")
                    .header("Authorization", "Bearer tok-u1")
                    .body(initialize_body())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(SESSION_ID_HEADER));
    }

    #[tokio::test]
    async fn test_post_without_auth_is_401() {
        let app = app();
        let response = app
            .oneshot(
                Request::post("/mcp")
                    .header("Content-Type", "application/json")
                    .body(initialize_body())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_post_with_stale_session_is_404() {
        let app = app();
        let response = app
            .oneshot(
                Request::post("/mcp")
                    .header("Content-Type", "application/json")
                    .header(SESSION_ID_HEADER, "stale-id")
                    .body(initialize_body())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_unknown_session_is_404() {
        let app = app();
        let response = app
            .oneshot(
                Request::delete("/mcp")
                    .header(SESSION_ID_HEADER, "nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_endpoint_reports_count() {
        let app = app();
        let response = app
            .oneshot(
                Request::get("/status/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["count"], 0);
    }
}
