//! The MCP server instance pool (spec.md §9): the one piece of
//! process-wide state besides the block-file mod-time cache, so that
//! multiple agents/tools naming the same server share one connection
//! ("spawns (or shares) a `Server` connection", spec.md §4.5) instead
//! of dialing it once per tool. Initializes lazily, one entry per first
//! use, and is torn down explicitly by the embedding host at shutdown.

use crate::client::McpClient;
use crate::server::{connect, ServerConfig};
use lacquer_core::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct ServerPool {
    connections: RwLock<HashMap<String, Arc<McpClient>>>,
}

impl ServerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing connection for `name` if one has already
    /// been established, otherwise dials `config` and caches the
    /// result. Double-checked locking: the common (already-connected)
    /// path only ever takes a read lock.
    pub async fn get_or_connect(
        &self,
        name: &str,
        config: &ServerConfig,
        client_name: &str,
        client_version: &str,
    ) -> Result<Arc<McpClient>> {
        if let Some(existing) = self.connections.read().await.get(name) {
            return Ok(Arc::clone(existing));
        }

        let mut guard = self.connections.write().await;
        if let Some(existing) = guard.get(name) {
            return Ok(Arc::clone(existing));
        }

        let client = connect(config, client_name, client_version).await?;
        guard.insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Closes every pooled connection. Intended for engine shutdown.
    pub async fn shutdown(&self) {
        let mut guard = self.connections.write().await;
        for (_, client) in guard.drain() {
            let _ = client.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoAuth;

    #[tokio::test]
    async fn shutdown_on_empty_pool_is_a_noop() {
        let pool = ServerPool::new();
        pool.shutdown().await;
    }

    #[test]
    fn server_config_constructs_for_each_transport_kind() {
        let _http = ServerConfig::Http {
            endpoint: "https://example.invalid/mcp".to_string(),
            auth: Arc::new(NoAuth),
        };
        let _ws = ServerConfig::WebSocket {
            url: "wss://example.invalid/mcp".to_string(),
            auth: Arc::new(NoAuth),
        };
        let _stdio = ServerConfig::Stdio {
            command: "mcp-server".to_string(),
            args: vec![],
            env: vec![],
        };
    }
}
