//! Server Instance Factory
//!
//! Builds a fresh per-session handler wired with that session's auth
//! context. The context is stored in the AuthContextStore strictly before
//! the handler is constructed, so the callback path can resolve it from the
//! moment the session exists.

use log::debug;
use std::sync::Arc;

use super::instance::McpInstance;
use super::transport::SessionTransport;
use crate::auth::{AuthContext, AuthContextStore, AuthInfo};
use crate::callback::CallbackCorrelator;

/// Constructs session-bound handler instances
pub struct InstanceFactory {
    auth_store: Arc<AuthContextStore>,
    correlator: Arc<CallbackCorrelator>,
}

impl InstanceFactory {
    pub fn new(auth_store: Arc<AuthContextStore>, correlator: Arc<CallbackCorrelator>) -> Self {
        Self {
            auth_store,
            correlator,
        }
    }

    /// Build a handler for a new session.
    ///
    /// The handler captures the session id and auth context by value, so
    /// in-flight requests keep the identity they started with even if the
    /// store is mutated or the session evicted mid-flight.
    pub fn build(&self, session_id: &str, info: AuthInfo) -> SessionTransport {
        let ctx = AuthContext::new(session_id, info);

        // Auth context must exist before the session it supports.
        self.auth_store.set(session_id, ctx.clone());

        debug!(
            "Built handler for session {} ({})",
            session_id,
            ctx.display_handle()
        );

        let instance = McpInstance::new(session_id, ctx, self.correlator.clone());
        SessionTransport::new(Arc::new(instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::ActionRegistry;
    use crate::notify::NotificationBroadcaster;

    #[tokio::test]
    async fn test_build_registers_auth_first() {
        let auth_store = Arc::new(AuthContextStore::new());
        let correlator = Arc::new(CallbackCorrelator::new(
            auth_store.clone(),
            Arc::new(NotificationBroadcaster::new()),
            Arc::new(ActionRegistry::new()),
        ));
        let factory = InstanceFactory::new(auth_store.clone(), correlator);

        let transport = factory.build("s1", AuthInfo::new("tok-1").with_handle("@u1"));
        assert_eq!(transport.session_id(), "s1");

        let ctx = auth_store.get("s1").unwrap();
        assert_eq!(ctx.session_id, "s1");
        assert_eq!(ctx.info.access_token, "tok-1");
    }
}
