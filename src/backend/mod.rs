//! Backend management
//!
//! The endpoint table maps each tool identifier to exactly one backend. Every
//! invocation opens its own session, calls the tool once and releases the
//! session on every exit path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::config::ToolEndpointConfig;
use crate::protocol::{Content, ToolsCallResult};
use crate::transport::{HttpTransport, Transport};
use crate::{Error, Result};

/// Resolved backend endpoint for one tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolEndpoint {
    /// Tool identifier
    pub tool: String,
    /// Streamable HTTP endpoint URL
    pub url: String,
    /// Deadline for connect + call
    pub timeout: Duration,
}

/// Static tool identifier -> endpoint mapping, read-only after startup
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    endpoints: BTreeMap<String, ToolEndpoint>,
}

impl EndpointTable {
    /// Build the table from configuration
    #[must_use]
    pub fn from_config(tools: &BTreeMap<String, ToolEndpointConfig>) -> Self {
        let endpoints = tools
            .iter()
            .map(|(tool, cfg)| {
                (
                    tool.clone(),
                    ToolEndpoint {
                        tool: tool.clone(),
                        url: cfg.url.clone(),
                        timeout: cfg.timeout,
                    },
                )
            })
            .collect();
        Self { endpoints }
    }

    /// Add or replace an entry
    #[must_use]
    pub fn with(mut self, tool: &str, url: &str, timeout: Duration) -> Self {
        self.endpoints.insert(
            tool.to_string(),
            ToolEndpoint {
                tool: tool.to_string(),
                url: url.to_string(),
                timeout,
            },
        );
        self
    }

    /// Resolve the endpoint serving `tool`
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnmappedTool`] if no endpoint is configured.
    pub fn resolve(&self, tool: &str) -> Result<&ToolEndpoint> {
        self.endpoints
            .get(tool)
            .ok_or_else(|| Error::UnmappedTool(tool.to_string()))
    }

    /// Number of mapped tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether no tool is mapped
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// An open session with one tool backend
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Invoke `name` and return the raw result payload
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value>;

    /// Release the session
    async fn close(&self) -> Result<()>;
}

/// Opens sessions to tool backends
#[async_trait]
pub trait ToolConnector: Send + Sync {
    /// Connect to `endpoint` and complete the protocol handshake
    async fn connect(&self, endpoint: &ToolEndpoint) -> Result<Arc<dyn ToolSession>>;
}

/// Connector speaking the tool protocol over streamable HTTP
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

#[async_trait]
impl ToolConnector for HttpConnector {
    async fn connect(&self, endpoint: &ToolEndpoint) -> Result<Arc<dyn ToolSession>> {
        let transport = HttpTransport::new(&endpoint.url, endpoint.timeout)?;
        transport.initialize().await?;
        Ok(Arc::new(McpSession { transport }))
    }
}

/// Session over any [`Transport`]
pub struct McpSession {
    transport: Arc<dyn Transport>,
}

impl McpSession {
    /// Wrap an initialized transport
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ToolSession for McpSession {
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        let response = self
            .transport
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;

        if let Some(err) = response.error {
            return Err(Error::UpstreamTool(err.message));
        }
        let result = response
            .result
            .ok_or_else(|| Error::Protocol("tools/call response has no result".to_string()))?;

        unwrap_call_result(result)
    }

    async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}

/// Turn a `tools/call` result into the payload handed to the normalizer.
///
/// `isError` results become [`Error::UpstreamTool`] carrying the text
/// content; successful results yield their `content` array untouched.
pub fn unwrap_call_result(result: Value) -> Result<Value> {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if is_error {
        let message = serde_json::from_value::<ToolsCallResult>(result.clone())
            .map(|r| error_text(&r.content))
            .unwrap_or_else(|_| result.to_string());
        return Err(Error::UpstreamTool(message));
    }

    match result {
        Value::Object(mut map) => Ok(map.remove("content").unwrap_or(Value::Object(map))),
        other => Err(Error::Normalization(format!(
            "tools/call result is not an object: {other}"
        ))),
    }
}

/// Text of an error result, preferring the `error` field of an embedded record
fn error_text(content: &[Content]) -> String {
    let text = content
        .iter()
        .map(|Content::Text { text }| text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(String::from))
        .unwrap_or(text)
}

/// Session that is released when it goes out of scope.
///
/// Call [`ScopedSession::release`] on the normal path to close in-line.
/// If the guard is dropped instead (error, timeout, or the consumer went
/// away) the close runs on a spawned task.
pub struct ScopedSession {
    session: Option<Arc<dyn ToolSession>>,
    url: String,
}

impl ScopedSession {
    /// Open a session to `endpoint`
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the backend cannot be reached.
    pub async fn acquire(connector: &dyn ToolConnector, endpoint: &ToolEndpoint) -> Result<Self> {
        let session = connector.connect(endpoint).await?;
        debug!(url = %endpoint.url, "Backend session acquired");
        Ok(Self {
            session: Some(session),
            url: endpoint.url.clone(),
        })
    }

    /// Invoke a tool on the held session
    ///
    /// # Errors
    ///
    /// Returns the session's error, or [`Error::Internal`] after release.
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::Internal("session already released".to_string()))?;
        session.call_tool(name, arguments).await
    }

    /// Close the session now
    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(url = %self.url, error = %e, "Failed to close backend session");
            }
            debug!(url = %self.url, "Backend session released");
        }
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let url = std::mem::take(&mut self.url);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        debug!(url = %url, error = %e, "Deferred session close failed");
                    }
                });
            }
            Err(_) => warn!(url = %url, "No runtime to release backend session"),
        }
    }
}

/// Dispatches tool calls to their backends
pub struct Backend {
    endpoints: EndpointTable,
    connector: Arc<dyn ToolConnector>,
}

impl Backend {
    /// Create a backend dispatcher
    #[must_use]
    pub fn new(endpoints: EndpointTable, connector: Arc<dyn ToolConnector>) -> Self {
        Self {
            endpoints,
            connector,
        }
    }

    /// Dispatcher over streamable HTTP
    #[must_use]
    pub fn http(endpoints: EndpointTable) -> Self {
        Self::new(endpoints, Arc::new(HttpConnector))
    }

    /// Endpoint table
    #[must_use]
    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    /// Invoke `endpoint.tool` once, within the endpoint's deadline
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the deadline passes, otherwise the
    /// connect or call failure.
    #[tracing::instrument(
        skip(self, endpoint, arguments),
        fields(
            tool = %endpoint.tool,
            url = %endpoint.url,
            request_id = %uuid::Uuid::new_v4()
        )
    )]
    pub async fn call_tool(
        &self,
        endpoint: &ToolEndpoint,
        arguments: Map<String, Value>,
    ) -> Result<Value> {
        let start_time = Instant::now();

        let call = async {
            let session = ScopedSession::acquire(self.connector.as_ref(), endpoint).await?;
            let result = session.call_tool(&endpoint.tool, arguments).await;
            session.release().await;
            result
        };

        let result = match tokio::time::timeout(endpoint.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(endpoint.timeout)),
        };

        let latency = start_time.elapsed();
        match &result {
            Ok(_) => tracing::info!(
                latency_ms = latency.as_millis(),
                "Tool call completed successfully"
            ),
            Err(e) => {
                tracing::error!(error = %e, latency_ms = latency.as_millis(), "Tool call failed");
            }
        }

        result
    }
}
