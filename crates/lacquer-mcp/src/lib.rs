//! MCP (Model Context Protocol) wire types, transports, auth providers
//! and the multiplexing client used by `lacquer_agent`'s tool registry.

pub mod auth;
pub mod client;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod transport;

pub use auth::{ApiKeyAuth, AuthProvider, BasicAuth, NoAuth, OAuth2Auth};
pub use client::McpClient;
pub use pool::ServerPool;
pub use server::{connect, ServerConfig};
pub use transport::{DuplexTransport, HttpTransport, StdioTransport, Transport, WebSocketTransport};
