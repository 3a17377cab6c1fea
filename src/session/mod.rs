//! Session Layer
//!
//! Per-tenant session lifecycle: the registry that owns session entries,
//! the factory that builds credential-bound handler instances, and the
//! per-session transport pairing a handler with its outbound channel.

pub mod factory;
pub mod instance;
pub mod registry;
pub mod transport;

pub use factory::InstanceFactory;
pub use instance::McpInstance;
pub use registry::{SessionError, SessionRegistry, SessionSummary};
pub use transport::SessionTransport;
