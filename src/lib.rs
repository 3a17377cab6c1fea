//! postbridge - Multi-tenant MCP session and callback-correlation server
//!
//! Each remote caller authenticates once, gets an isolated per-session
//! protocol handler bound to its own credentials, and can run "generate
//! content, then act on it" operations whose completion arrives out-of-band
//! and is routed back to the originating tenant only.

pub mod actions;
pub mod auth;
pub mod callback;
pub mod mcp;
pub mod notify;
pub mod router;
pub mod server;
pub mod session;

pub use auth::{AuthContext, AuthContextStore, AuthInfo, AuthResolver, BearerResolver};
pub use callback::{ActionRegistry, CallbackAction, CallbackCorrelator};
pub use mcp::{McpError, McpResult};
pub use notify::{Delivery, NotificationBroadcaster, ServerNotification};
pub use router::{RequestRouter, Routed};
pub use server::{build_router, AppState};
pub use session::{InstanceFactory, SessionRegistry, SessionSummary, SessionTransport};
