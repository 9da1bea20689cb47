//! The wire transports an MCP `Server` can speak over.
//!
//! stdio and WebSocket are full-duplex, framed connections: many
//! requests can be in flight at once, and responses can arrive out of
//! order, so both implement [`DuplexTransport`] and let
//! [`crate::client::McpClient`] own the request-id correlation (a
//! shared pending-response map plus a background reader task). HTTP is
//! simple request/response and needs no correlation, so it implements
//! [`Transport`] directly.
//!
//! Grounded on the teacher's `StdioTransport`/`McpConnection` split in
//! `workflow-engine-mcp/src/transport.rs`, generalized to HTTP and
//! WebSocket and to genuine concurrent multiplexing.

use async_trait::async_trait;
use lacquer_core::error::{LacquerError, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::protocol::{RpcRequest, RpcResponse};

/// A transport that can be sent a single request and, synchronously
/// from the caller's perspective, produce the matching response. Only
/// HTTP implements this directly; stdio/WebSocket are adapted to it by
/// [`crate::client::McpClient`]'s multiplexer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RpcRequest) -> Result<Option<RpcResponse>>;
    async fn close(&self) -> Result<()>;
}

/// A framed, full-duplex byte transport: write one frame, read frames
/// as they arrive, in any order relative to writes.
#[async_trait]
pub trait DuplexTransport: Send + Sync {
    async fn write_frame(&self, text: String) -> Result<()>;
    /// `Ok(None)` signals a clean close.
    async fn read_frame(&self) -> Result<Option<String>>;
    async fn close(&self) -> Result<()>;
}

/// Spawns `command args...` and speaks newline-delimited JSON-RPC over
/// its stdin/stdout, mirroring stderr to `tracing`.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<tokio::process::ChildStdin>,
    stdout: Mutex<BufReader<tokio::process::ChildStdout>>,
}

impl StdioTransport {
    pub async fn spawn(command: &str, args: &[String], env: &[(String, String)]) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|e| LacquerError::TransportError {
            transport: "stdio".to_string(),
            message: format!("failed to spawn '{command}': {e}"),
            source: Some(Box::new(e)),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LacquerError::TransportError {
                transport: "stdio".to_string(),
                message: "child process has no stdin".to_string(),
                source: None,
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LacquerError::TransportError {
                transport: "stdio".to_string(),
                message: "child process has no stdout".to_string(),
                source: None,
            })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(mirror_stderr_to_logs(stderr, command.to_string()));
        }

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
        })
    }
}

async fn mirror_stderr_to_logs(stderr: tokio::process::ChildStderr, command: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(target: "lacquer_mcp::stdio", %command, "{line}");
    }
}

#[async_trait]
impl DuplexTransport for StdioTransport {
    async fn write_frame(&self, mut text: String) -> Result<()> {
        text.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| LacquerError::TransportError {
                transport: "stdio".to_string(),
                message: format!("write failed: {e}"),
                source: Some(Box::new(e)),
            })
    }

    async fn read_frame(&self) -> Result<Option<String>> {
        let mut line = String::new();
        let mut stdout = self.stdout.lock().await;
        let n = stdout
            .read_line(&mut line)
            .await
            .map_err(|e| LacquerError::TransportError {
                transport: "stdio".to_string(),
                message: format!("read failed: {e}"),
                source: Some(Box::new(e)),
            })?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    async fn close(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
        Ok(())
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct WsHalves {
    sink: futures_util::stream::SplitSink<WsStream, WsMessage>,
    stream: futures_util::stream::SplitStream<WsStream>,
}

/// Caps how many consecutive dial attempts [`WebSocketTransport::reconnect`]
/// makes before giving up and surfacing the failure to the caller.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// A single WebSocket connection to an MCP server. A transient read or
/// write failure triggers an automatic reconnect (spec.md §4.5:
/// "auto-reconnect on transient failures"), using the same exponential
/// backoff the step scheduler uses for retries
/// ([`lacquer_core::retry::backoff_delay`]). The 30-second ping
/// keepalive is driven by [`crate::client::McpClient`], which calls
/// [`Self::send_ping`] on a timer.
pub struct WebSocketTransport {
    url: String,
    auth_header: Option<(String, String)>,
    halves: Mutex<WsHalves>,
}

impl WebSocketTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_auth(url, None).await
    }

    pub async fn connect_with_auth(url: &str, auth_header: Option<(String, String)>) -> Result<Self> {
        let halves = Self::dial(url, &auth_header).await?;
        Ok(Self {
            url: url.to_string(),
            auth_header,
            halves: Mutex::new(halves),
        })
    }

    async fn dial(url: &str, auth_header: &Option<(String, String)>) -> Result<WsHalves> {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

        let mut request = url.into_client_request().map_err(|e| LacquerError::TransportError {
            transport: "websocket".to_string(),
            message: format!("invalid websocket url {url}: {e}"),
            source: Some(Box::new(e)),
        })?;

        if let Some((name, value)) = auth_header {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| LacquerError::TransportError {
                transport: "websocket".to_string(),
                message: format!("invalid auth header name '{name}': {e}"),
                source: Some(Box::new(e)),
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| LacquerError::TransportError {
                transport: "websocket".to_string(),
                message: format!("invalid auth header value: {e}"),
                source: Some(Box::new(e)),
            })?;
            request.headers_mut().insert(header_name, header_value);
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| LacquerError::TransportError {
                transport: "websocket".to_string(),
                message: format!("connect to {url} failed: {e}"),
                source: Some(Box::new(e)),
            })?;
        let (sink, stream) = ws_stream.split();
        Ok(WsHalves { sink, stream })
    }

    /// Re-dials with exponential backoff, replacing the live connection
    /// in place once a new one succeeds. Callers must not hold the
    /// `halves` lock when calling this.
    async fn reconnect(&self) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match Self::dial(&self.url, &self.auth_header).await {
                Ok(fresh) => {
                    *self.halves.lock().await = fresh;
                    tracing::info!(url = %self.url, "mcp websocket reconnected");
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_RECONNECT_ATTEMPTS {
                        return Err(e);
                    }
                    let delay = lacquer_core::retry::backoff_delay(
                        attempt - 1,
                        std::time::Duration::from_secs(1),
                        2.0,
                        std::time::Duration::from_secs(30),
                        0.2,
                        None,
                    );
                    tracing::warn!(url = %self.url, attempt, "mcp websocket reconnect failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub async fn send_ping(&self) -> Result<()> {
        use futures_util::SinkExt;
        let mut halves = self.halves.lock().await;
        halves
            .sink
            .send(WsMessage::Ping(Vec::new()))
            .await
            .map_err(|e| LacquerError::TransportError {
                transport: "websocket".to_string(),
                message: format!("ping failed: {e}"),
                source: Some(Box::new(e)),
            })
    }
}

#[async_trait]
impl DuplexTransport for WebSocketTransport {
    async fn write_frame(&self, text: String) -> Result<()> {
        use futures_util::SinkExt;

        {
            let mut halves = self.halves.lock().await;
            if halves.sink.send(WsMessage::Text(text.clone())).await.is_ok() {
                return Ok(());
            }
        }

        self.reconnect().await?;
        let mut halves = self.halves.lock().await;
        halves
            .sink
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| LacquerError::TransportError {
                transport: "websocket".to_string(),
                message: format!("send failed after reconnect: {e}"),
                source: Some(Box::new(e)),
            })
    }

    async fn read_frame(&self) -> Result<Option<String>> {
        use futures_util::StreamExt;

        loop {
            let next = {
                let mut halves = self.halves.lock().await;
                halves.stream.next().await
            };

            match next {
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text)),
                Some(Ok(WsMessage::Pong(_))) | Some(Ok(WsMessage::Ping(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => {
                    if self.reconnect().await.is_ok() {
                        continue;
                    }
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!("mcp websocket read failed, attempting reconnect: {e}");
                    if self.reconnect().await.is_ok() {
                        continue;
                    }
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        use futures_util::SinkExt;
        let mut halves = self.halves.lock().await;
        let _ = halves.sink.send(WsMessage::Close(None)).await;
        Ok(())
    }
}

/// POSTs each request as a JSON body; the HTTP response body is the RPC
/// response. Notifications (no `id`) still POST but discard the body.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    auth_header: Option<(String, String)>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, auth_header: Option<(String, String)>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            auth_header,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RpcRequest) -> Result<Option<RpcResponse>> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some((name, value)) = &self.auth_header {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LacquerError::TransportError {
                transport: "http".to_string(),
                message: format!("request to {} failed: {e}", self.endpoint),
                source: Some(Box::new(e)),
            })?;

        if request.is_notification() {
            return Ok(None);
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| LacquerError::TransportError {
                transport: "http".to_string(),
                message: format!("invalid JSON-RPC response: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Some(body))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RpcRequest;

    #[tokio::test]
    async fn http_transport_round_trips_via_wiremock() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"tools": []}
            })))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri(), None);
        let request = RpcRequest::new(1, "tools/list", None);
        let response = transport.send(&request).await.unwrap().unwrap();
        assert_eq!(response.id, Some(1));
    }
}
