//! The shared multiplexing client every `Server` connection uses
//! regardless of transport: monotonic request ids, a pending-response
//! map, and delivery via per-id one-shot channels (spec.md §4.5 "All
//! three transports multiplex over a shared client").
//!
//! HTTP needs none of this (each POST already carries its own
//! response), so [`McpClient::Http`] bypasses the pending map and talks
//! to [`crate::transport::HttpTransport`] directly.

use crate::protocol::{
    call_tool_request, initialize_request, initialized_notification, list_tools_request,
    CallToolResult, InitializeResult, ListToolsResult, RpcResponse,
};
use crate::transport::{DuplexTransport, HttpTransport, Transport};
use lacquer_core::error::{LacquerError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<RpcResponse>>>>;

struct DuplexState<T: DuplexTransport + 'static> {
    transport: Arc<T>,
    pending: PendingMap,
    next_id: AtomicI64,
}

impl<T: DuplexTransport + 'static> DuplexState<T> {
    fn new(transport: T) -> Arc<Self> {
        let state = Arc::new(Self {
            transport: Arc::new(transport),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicI64::new(1),
        });
        state.clone().spawn_reader();
        state
    }

    fn spawn_reader(self: Arc<Self>) {
        let transport = Arc::clone(&self.transport);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            loop {
                match transport.read_frame().await {
                    Ok(Some(frame)) => {
                        if let Ok(response) = serde_json::from_str::<RpcResponse>(&frame) {
                            if let Some(id) = response.id {
                                let mut guard = pending.lock().await;
                                if let Some(tx) = guard.remove(&id) {
                                    let _ = tx.send(response);
                                }
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("mcp reader task exiting: {e}");
                        break;
                    }
                }
            }
        });
    }

    async fn call(&self, request: &crate::protocol::RpcRequest) -> Result<Option<RpcResponse>> {
        if request.is_notification() {
            self.transport.write_frame(serde_json::to_string(request)?).await?;
            return Ok(None);
        }

        let id = request.id.expect("non-notification requests carry an id");
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.transport
            .write_frame(serde_json::to_string(request)?)
            .await?;

        let response = rx.await.map_err(|_| LacquerError::TransportError {
            transport: "mcp".to_string(),
            message: format!("connection closed while awaiting response to request {id}"),
            source: None,
        })?;
        Ok(Some(response))
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Pings the WebSocket every 30 seconds (spec.md §4.5) for as long as
/// `state` has at least one other owner; holds only a [`Weak`] so the
/// keepalive task doesn't itself keep a dropped client's connection
/// alive.
fn spawn_ping_keepalive(state: Arc<DuplexState<crate::transport::WebSocketTransport>>) {
    let weak = std::sync::Arc::downgrade(&state);
    drop(state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        ticker.tick().await; // the first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            let Some(state) = weak.upgrade() else {
                break;
            };
            if let Err(e) = state.transport.send_ping().await {
                tracing::warn!("mcp websocket ping keepalive failed: {e}");
            }
        }
    });
}

enum Inner {
    Stdio(Arc<DuplexState<crate::transport::StdioTransport>>),
    WebSocket(Arc<DuplexState<crate::transport::WebSocketTransport>>),
    Http(HttpTransport, AtomicI64),
}

/// A connection to one MCP server: handles `initialize`, `tools/list`
/// and `tools/call`, over whichever transport it was built with.
pub struct McpClient {
    inner: Inner,
    initialized: std::sync::atomic::AtomicBool,
}

impl McpClient {
    pub fn stdio(transport: crate::transport::StdioTransport) -> Self {
        Self {
            inner: Inner::Stdio(DuplexState::new(transport)),
            initialized: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Builds a client over an already-connected WebSocket transport and
    /// starts the 30-second ping keepalive (spec.md §4.5) as a
    /// background task tied to the transport's lifetime.
    pub fn websocket(transport: crate::transport::WebSocketTransport) -> Self {
        let state = DuplexState::new(transport);
        spawn_ping_keepalive(Arc::clone(&state));
        Self {
            inner: Inner::WebSocket(state),
            initialized: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn http(transport: HttpTransport) -> Self {
        Self {
            inner: Inner::Http(transport, AtomicI64::new(1)),
            initialized: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn allocate_id(&self) -> i64 {
        match &self.inner {
            Inner::Stdio(s) => s.allocate_id(),
            Inner::WebSocket(s) => s.allocate_id(),
            Inner::Http(_, counter) => counter.fetch_add(1, Ordering::SeqCst),
        }
    }

    async fn call(&self, request: &crate::protocol::RpcRequest) -> Result<Option<RpcResponse>> {
        match &self.inner {
            Inner::Stdio(s) => s.call(request).await,
            Inner::WebSocket(s) => s.call(request).await,
            Inner::Http(t, _) => t.send(request).await,
        }
    }

    /// Sends `initialize`, then the `notifications/initialized`
    /// notification, matching the handshake spec.md §4.5 pins.
    pub async fn initialize(&self, client_name: &str, client_version: &str) -> Result<InitializeResult> {
        let id = self.allocate_id();
        let request = initialize_request(id, client_name, client_version);
        let response = self.expect_response(&request).await?;
        let result: InitializeResult = decode_result(response, "initialize")?;

        let note = initialized_notification();
        self.call(&note).await?;

        self.initialized.store(true, Ordering::SeqCst);
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<ListToolsResult> {
        self.require_initialized("tools/list")?;
        let id = self.allocate_id();
        let request = list_tools_request(id);
        let response = self.expect_response(&request).await?;
        decode_result(response, "tools/list")
    }

    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<CallToolResult> {
        self.require_initialized("tools/call")?;
        let id = self.allocate_id();
        let request = call_tool_request(id, name, arguments);
        let response = self.expect_response(&request).await?;
        decode_result(response, "tools/call")
    }

    pub async fn close(&self) -> Result<()> {
        match &self.inner {
            Inner::Stdio(s) => s.transport.close().await,
            Inner::WebSocket(s) => s.transport.close().await,
            Inner::Http(t, _) => t.close().await,
        }
    }

    fn require_initialized(&self, operation: &str) -> Result<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(LacquerError::TransportError {
                transport: "mcp".to_string(),
                message: format!("'{operation}' called before initialize"),
                source: None,
            });
        }
        Ok(())
    }

    async fn expect_response(&self, request: &crate::protocol::RpcRequest) -> Result<RpcResponse> {
        self.call(request)
            .await?
            .ok_or_else(|| LacquerError::TransportError {
                transport: "mcp".to_string(),
                message: "expected a response but got none".to_string(),
                source: None,
            })
    }
}

fn decode_result<T: serde::de::DeserializeOwned>(response: RpcResponse, operation: &str) -> Result<T> {
    if let Some(error) = response.error {
        return Err(LacquerError::TransportError {
            transport: "mcp".to_string(),
            message: format!("{operation} failed ({}): {}", error.code, error.message),
            source: None,
        });
    }
    let result = response.result.ok_or_else(|| LacquerError::TransportError {
        transport: "mcp".to_string(),
        message: format!("{operation} response has neither result nor error"),
        source: None,
    })?;
    serde_json::from_value(result).map_err(LacquerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RpcRequest;
    use crate::transport::DuplexTransport;
    use tokio::sync::mpsc;

    /// An in-memory duplex whose "server" side only produces a response
    /// after observing the matching write, so the test can force
    /// responses to arrive out of order without racing the reader task.
    struct FakeDuplex {
        sent: mpsc::UnboundedSender<String>,
        incoming: Mutex<mpsc::UnboundedReceiver<String>>,
    }

    #[async_trait::async_trait]
    impl DuplexTransport for FakeDuplex {
        async fn write_frame(&self, text: String) -> lacquer_core::error::Result<()> {
            self.sent.send(text).ok();
            Ok(())
        }

        async fn read_frame(&self) -> lacquer_core::error::Result<Option<String>> {
            Ok(self.incoming.lock().await.recv().await)
        }

        async fn close(&self) -> lacquer_core::error::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_calls_correlate_by_id() {
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel::<String>();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel::<String>();
        let fake = FakeDuplex {
            sent: sent_tx,
            incoming: Mutex::new(resp_rx),
        };
        let state = DuplexState::new(fake);

        let req1 = RpcRequest::new(1, "tools/list", None);
        let req2 = RpcRequest::new(2, "tools/list", None);

        let state_for_calls = Arc::clone(&state);
        let calls = tokio::spawn(async move {
            tokio::join!(state_for_calls.call(&req1), state_for_calls.call(&req2))
        });

        // Wait for both writes, then deliver responses deliberately out
        // of order: id 2 before id 1.
        sent_rx.recv().await.unwrap();
        sent_rx.recv().await.unwrap();
        resp_tx
            .send(serde_json::json!({"jsonrpc":"2.0","id":2,"result":{"tools":[]}}).to_string())
            .unwrap();
        resp_tx
            .send(serde_json::json!({"jsonrpc":"2.0","id":1,"result":{"tools":[]}}).to_string())
            .unwrap();

        let (r1, r2) = calls.await.unwrap();
        assert_eq!(r1.unwrap().unwrap().id, Some(1));
        assert_eq!(r2.unwrap().unwrap().id, Some(2));
    }
}
