//! Declarative MCP `Server` configuration and connection (spec.md
//! §4.5): the three transport variants a workflow's `tools:` section
//! can name, plus `${VAR}`-against-the-process-environment
//! interpolation for a stdio server's declared env vars.

use crate::auth::AuthProvider;
use crate::client::McpClient;
use crate::transport::{HttpTransport, StdioTransport, WebSocketTransport};
use lacquer_core::error::Result;
use std::sync::Arc;

/// One MCP server a workflow's agents can reference by name.
pub enum ServerConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: Vec<(String, String)>,
    },
    Http {
        endpoint: String,
        auth: Arc<dyn AuthProvider>,
    },
    WebSocket {
        url: String,
        auth: Arc<dyn AuthProvider>,
    },
}

/// Connects to `config` over the right transport, performs the
/// `initialize` / `notifications/initialized` handshake (spec.md
/// §4.5's "MCP initialization"), and returns the ready-to-use client.
pub async fn connect(config: &ServerConfig, client_name: &str, client_version: &str) -> Result<Arc<McpClient>> {
    let client = match config {
        ServerConfig::Stdio { command, args, env } => {
            let interpolated: Vec<(String, String)> = env
                .iter()
                .map(|(k, v)| (k.clone(), interpolate_env(v)))
                .collect();
            let transport = StdioTransport::spawn(command, args, &interpolated).await?;
            McpClient::stdio(transport)
        }
        ServerConfig::Http { endpoint, auth } => {
            let header = auth.header().await?;
            McpClient::http(HttpTransport::new(endpoint.clone(), header))
        }
        ServerConfig::WebSocket { url, auth } => {
            let header = auth.header().await?;
            let transport = WebSocketTransport::connect_with_auth(url, header).await?;
            McpClient::websocket(transport)
        }
    };

    client.initialize(client_name, client_version).await?;
    Ok(Arc::new(client))
}

/// Replaces every `${NAME}` occurrence in `value` with the current
/// process's `NAME` environment variable, or the empty string if unset
/// (spec.md §4.5: "spawn `command args...` with declared env
/// (interpolating `${VAR}` against the process env)").
pub fn interpolate_env(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(rel_end) = value[i + 2..].find('}') {
                let var_name = &value[i + 2..i + 2 + rel_end];
                if let Ok(resolved) = std::env::var(var_name) {
                    out.push_str(&resolved);
                }
                i += 2 + rel_end + 1;
                continue;
            }
        }
        let ch = value[i..].chars().next().expect("i < bytes.len()");
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_known_variable() {
        std::env::set_var("LACQUER_TEST_VAR_A", "hello");
        assert_eq!(interpolate_env("prefix-${LACQUER_TEST_VAR_A}-suffix"), "prefix-hello-suffix");
        std::env::remove_var("LACQUER_TEST_VAR_A");
    }

    #[test]
    fn unknown_variable_becomes_empty() {
        std::env::remove_var("LACQUER_TEST_VAR_B_DEFINITELY_UNSET");
        assert_eq!(interpolate_env("${LACQUER_TEST_VAR_B_DEFINITELY_UNSET}"), "");
    }

    #[test]
    fn text_with_no_placeholders_passes_through() {
        assert_eq!(interpolate_env("plain text, no vars"), "plain text, no vars");
    }

    #[test]
    fn unterminated_placeholder_is_left_verbatim() {
        assert_eq!(interpolate_env("broken ${OOPS"), "broken ${OOPS");
    }
}
