//! Streamable HTTP transport
//!
//! Every JSON-RPC message is a POST to one endpoint:
//! 1. `initialize` (the server may answer with an `Mcp-Session-Id` header)
//! 2. `notifications/initialized`
//! 3. any number of requests, echoing the session id
//! 4. `DELETE` with the session id on close
//!
//! Responses arrive either as `application/json` or as a single-event
//! `text/event-stream` body; both are accepted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::Transport;
use crate::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId,
};
use crate::{Error, Result};

/// Session header name (matched case-insensitively by HTTP)
pub const SESSION_HEADER: &str = "mcp-session-id";
/// Protocol version header name
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// HTTP transport for a streamable HTTP tool endpoint
pub struct HttpTransport {
    /// HTTP client
    client: Client,
    /// Endpoint URL (always with trailing slash)
    url: String,
    /// Session ID issued by the server on initialize
    session_id: RwLock<Option<String>>,
    /// Request ID counter
    request_id: AtomicI64,
    /// Connected flag
    connected: AtomicBool,
}

impl HttpTransport {
    /// Create a transport for `url` with a per-request `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        // `/mcp` is redirected to `/mcp/` by some servers, dropping the POST body
        let mut url = url.to_string();
        if !url.ends_with('/') {
            url.push('/');
        }

        Ok(Arc::new(Self {
            client,
            url,
            session_id: RwLock::new(None),
            request_id: AtomicI64::new(1),
            connected: AtomicBool::new(false),
        }))
    }

    /// Endpoint URL requests are sent to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Session ID, once the server has issued one
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Perform the initialize handshake
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is unreachable or rejects `initialize`.
    pub async fn initialize(&self) -> Result<()> {
        let request = JsonRpcRequest::new(
            RequestId::Number(0),
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        );

        let response = self.send_request(&request).await?;
        if let Some(err) = response.error {
            return Err(Error::Protocol(format!(
                "Initialize failed: {} ({})",
                err.message, err.code
            )));
        }

        self.notify("notifications/initialized", None).await?;

        self.connected.store(true, Ordering::Relaxed);
        debug!(url = %self.url, session = ?self.session_id(), "HTTP transport initialized");

        Ok(())
    }

    fn base_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        headers.insert(
            PROTOCOL_VERSION_HEADER,
            HeaderValue::from_static(PROTOCOL_VERSION),
        );

        if let Some(ref id) = *self.session_id.read() {
            let value = HeaderValue::from_str(id)
                .map_err(|e| Error::Transport(format!("Invalid session id: {e}")))?;
            headers.insert(SESSION_HEADER, value);
        }

        Ok(headers)
    }

    /// Send a request and parse the JSON-RPC response
    async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let response = self
            .client
            .post(&self.url)
            .headers(self.base_headers()?)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(describe(&e)))?;

        self.capture_session_id(&response);

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("HTTP {status}: {body}")));
        }

        let is_sse = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read response: {}", describe(&e))))?;

        if is_sse {
            parse_sse_body(&text)
        } else {
            serde_json::from_str(&text)
                .map_err(|e| Error::Transport(format!("Failed to parse response: {e}")))
        }
    }

    fn capture_session_id(&self, response: &Response) {
        if self.session_id.read().is_some() {
            return;
        }
        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            debug!(session_id = %id, url = %self.url, "Stored session ID from response");
            *self.session_id.write() = Some(id.to_string());
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Extract the JSON-RPC response from an SSE body.
///
/// The first `data:` payload that parses as a response wins; multi-line data
/// fields are joined per the SSE framing rules.
fn parse_sse_body(text: &str) -> Result<JsonRpcResponse> {
    let mut data = String::new();
    for line in text.lines().chain(std::iter::once("")) {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.is_empty() && !data.is_empty() {
            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&data) {
                // Server-initiated notifications carry no id
                if response.id.is_some() {
                    return Ok(response);
                }
            }
            data.clear();
        }
    }
    Err(Error::Transport("No response in SSE body".to_string()))
}

/// Render a reqwest error including its source chain
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        self.send_request(&request).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);

        let response = self
            .client
            .post(&self.url)
            .headers(self.base_headers()?)
            .json(&notification)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Notification failed: {}", describe(&e))))?;

        if !response.status().is_success() {
            warn!(
                status = %response.status(),
                url = %self.url,
                method = %method,
                "Notification rejected"
            );
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::Relaxed) {
            return Ok(());
        }

        let session_id = self.session_id.write().take();
        if let Some(id) = session_id {
            let result = self
                .client
                .delete(&self.url)
                .header(SESSION_HEADER, id.as_str())
                .send()
                .await;
            if let Err(e) = result {
                debug!(url = %self.url, error = %e, "Session termination failed");
            }
        }

        Ok(())
    }
}
