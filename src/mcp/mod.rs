//! MCP (Model Context Protocol) Module
//!
//! Server-side wire types and error taxonomy for the Streamable HTTP
//! transport: JSON-RPC envelopes, initialize/tool structures, sampling
//! request/result types, and the shared `McpError` taxonomy.

pub mod error;
pub mod types;

pub use error::{McpError, McpResult};
pub use types::*;
