//! MCP tool server

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header::HeaderName},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ToolRegistry;
use crate::config::ToolServerConfig;
use crate::error::rpc_codes;
use crate::gateway::shutdown_signal;
use crate::protocol::{
    Info, InitializeResult, JsonRpcResponse, RequestId, ServerCapabilities, ToolsCallParams,
    ToolsCallResult, ToolsCapability, ToolsListResult, negotiate_version,
};
use crate::transport::SESSION_HEADER;
use crate::{Error, Result};

/// Most sessions tracked at once; the oldest is forgotten past this
const MAX_SESSIONS: usize = 1024;

/// Issued session ids, oldest first, bounded for clients that never DELETE
struct SessionTable {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SessionTable {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, id: String) {
        while self.order.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.ids.remove(&oldest);
            debug!(session_id = %oldest, "Session evicted");
        }
        self.ids.insert(id.clone());
        self.order.push_back(id);
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn remove(&mut self, id: &str) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.order.retain(|known| known != id);
        true
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

struct ServerState {
    registry: ToolRegistry,
    sessions: RwLock<SessionTable>,
    info: Info,
}

/// Create the tool server router
pub fn create_tool_router(registry: ToolRegistry, name: &str) -> Router {
    router_with_session_limit(registry, name, MAX_SESSIONS)
}

fn router_with_session_limit(registry: ToolRegistry, name: &str, max_sessions: usize) -> Router {
    let state = Arc::new(ServerState {
        registry,
        sessions: RwLock::new(SessionTable::new(max_sessions)),
        info: Info {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    });

    Router::new()
        .route("/health", get(health_handler))
        .route("/mcp", post(mcp_handler).delete(delete_handler))
        .route("/mcp/", post(mcp_handler).delete(delete_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "tools": state.registry.names(),
    }))
}

/// DELETE /mcp - end a session
async fn delete_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> StatusCode {
    match session_header(&headers) {
        Some(id) if state.sessions.write().remove(id) => {
            debug!(session_id = %id, "Session closed");
            StatusCode::NO_CONTENT
        }
        Some(_) => StatusCode::NOT_FOUND,
        None => StatusCode::BAD_REQUEST,
    }
}

/// POST /mcp - JSON-RPC requests and notifications
async fn mcp_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            let rpc = JsonRpcResponse::error(
                None,
                rpc_codes::PARSE_ERROR,
                format!("Invalid JSON: {e}"),
            );
            return (StatusCode::BAD_REQUEST, Json(rpc)).into_response();
        }
    };

    let (id, method, params) = match parse_request(&value) {
        Ok(parsed) => parsed,
        Err(rpc) => return (StatusCode::BAD_REQUEST, Json(rpc)).into_response(),
    };

    if method.starts_with("notifications/") {
        debug!(method = %method, "Notification received");
        return StatusCode::ACCEPTED.into_response();
    }
    let Some(id) = id else {
        let rpc = JsonRpcResponse::error(None, rpc_codes::INVALID_REQUEST, "Missing id");
        return (StatusCode::BAD_REQUEST, Json(rpc)).into_response();
    };

    if method == "initialize" {
        return initialize(&state, id, params.as_ref());
    }

    if let Some(session) = session_header(&headers) {
        if !state.sessions.read().contains(session) {
            let rpc = JsonRpcResponse::error(
                Some(id),
                rpc_codes::INVALID_REQUEST,
                "Unknown session",
            );
            return (StatusCode::NOT_FOUND, Json(rpc)).into_response();
        }
    }

    let rpc = match method.as_str() {
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => to_response(
            id,
            &ToolsListResult {
                tools: state.registry.definitions(),
                next_cursor: None,
            },
        ),
        "tools/call" => call_tool(&state, id, params).await,
        other => JsonRpcResponse::error(
            Some(id),
            rpc_codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    };
    Json(rpc).into_response()
}

fn initialize(state: &ServerState, id: RequestId, params: Option<&Value>) -> Response {
    let requested = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let session_id = Uuid::new_v4().to_string();
    let open_sessions = {
        let mut sessions = state.sessions.write();
        sessions.insert(session_id.clone());
        sessions.len()
    };

    let result = InitializeResult {
        protocol_version: negotiate_version(requested).to_string(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability::default()),
        },
        server_info: state.info.clone(),
        instructions: None,
    };
    info!(
        session_id = %session_id,
        protocol = %result.protocol_version,
        open_sessions,
        "Session opened"
    );

    let mut response = Json(to_response(id, &result)).into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    response
}

/// Run a registered tool. Handler failures become `isError` results, not
/// JSON-RPC errors, so the caller sees them as tool output.
async fn call_tool(state: &ServerState, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
    let params: ToolsCallParams = match params.map(serde_json::from_value).transpose() {
        Ok(Some(p)) => p,
        Ok(None) => {
            return JsonRpcResponse::error(Some(id), rpc_codes::INVALID_PARAMS, "Missing params");
        }
        Err(e) => {
            return JsonRpcResponse::error(
                Some(id),
                rpc_codes::INVALID_PARAMS,
                format!("Invalid params: {e}"),
            );
        }
    };

    let Some(handler) = state.registry.get(&params.name) else {
        return JsonRpcResponse::error(
            Some(id),
            rpc_codes::INVALID_PARAMS,
            format!("Unknown tool: {}", params.name),
        );
    };

    let arguments = if params.arguments.is_null() {
        json!({})
    } else {
        params.arguments
    };

    let started = std::time::Instant::now();
    let result = match handler.call(arguments).await {
        Ok(value) => {
            info!(tool = %params.name, elapsed_ms = started.elapsed().as_millis(), "Tool succeeded");
            ToolsCallResult::json(&value)
        }
        Err(e) => {
            warn!(tool = %params.name, elapsed_ms = started.elapsed().as_millis(), error = %e, "Tool failed");
            ToolsCallResult::tool_error(tool_error_message(e))
        }
    };
    to_response(id, &result)
}

fn tool_error_message(error: Error) -> String {
    match error {
        Error::JsonRpc { message, .. } => message,
        other => other.to_string(),
    }
}

fn to_response<T: serde::Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(Some(id), rpc_codes::INTERNAL_ERROR, e.to_string()),
    }
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn extract_request_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        _ => None,
    }
}

/// Parse a JSON-RPC request or notification into `(id, method, params)`
#[allow(clippy::result_large_err)]
fn parse_request(
    value: &Value,
) -> std::result::Result<(Option<RequestId>, String, Option<Value>), JsonRpcResponse> {
    if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }

    let id = value.get("id").and_then(extract_request_id);
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method"))?;

    if !method.starts_with("notifications/") && id.is_none() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Missing id",
        ));
    }

    Ok((id, method.to_string(), value.get("params").cloned()))
}

/// Backend tool service
pub struct ToolServer {
    config: ToolServerConfig,
    registry: ToolRegistry,
}

impl ToolServer {
    /// Create a tool server
    #[must_use]
    pub fn new(config: ToolServerConfig, registry: ToolRegistry) -> Self {
        Self { config, registry }
    }

    /// Serve until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns an error if no tool is registered, the address is invalid, or
    /// the listener cannot bind.
    pub async fn run(self) -> Result<()> {
        if self.registry.is_empty() {
            return Err(Error::Config("no tools selected".to_string()));
        }
        let addr = SocketAddr::new(
            self.config
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.port,
        );

        let tools = self.registry.names().join(", ");
        let app = create_tool_router(self.registry, &self.config.name);
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("{} v{}", self.config.name, env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(tools = %tools, "Serving tools");
        info!(
            "  POST http://{}:{}/mcp/",
            self.config.host, self.config.port
        );
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Tool server stopped");
        Ok(())
    }
}
