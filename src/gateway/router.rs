//! HTTP router and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, info};

use super::streaming::{invoke, sse_response};
use crate::backend::Backend;
use crate::routing::{ToolDecision, decide};

/// Shared application state
pub struct AppState {
    /// Tool dispatcher
    pub backend: Arc<Backend>,
    /// SSE keep-alive interval (zero disables)
    pub keep_alive: Duration,
}

/// Inbound message body
#[derive(Debug, Deserialize)]
pub struct ProcessMessage {
    /// Free-form user text
    pub message: String,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/process_message", post(process_message_handler))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

/// POST /process_message - route, dispatch and stream
async fn process_message_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessMessage>,
) -> Response {
    let call = match decide(&body.message).into_call() {
        Ok(call) => call,
        Err(e) => {
            debug!(error = %e, "Message rejected by router");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
                .into_response();
        }
    };

    info!(tool = %call.tool, "Dispatching message");
    let events = invoke(Arc::clone(&state.backend), ToolDecision::Invoke(call));
    sse_response(events, state.keep_alive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EndpointTable;
    use crate::routing::NO_SEARCH_QUERY;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> Router {
        let table = EndpointTable::default()
            .with("search", "http://127.0.0.1:1/mcp/", Duration::from_secs(2))
            .with("summarize", "http://127.0.0.1:1/mcp/", Duration::from_secs(2));
        let state = Arc::new(AppState {
            backend: Arc::new(Backend::http(table)),
            keep_alive: Duration::ZERO,
        });
        create_router(state, 64 * 1024)
    }

    fn post_message(message: &str) -> Request<Body> {
        Request::post("/process_message")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "message": message }).to_string()))
            .unwrap()
    }

    // =====================================================================
    // health
    // =====================================================================

    #[tokio::test]
    async fn health_reports_healthy() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"status": "healthy"}));
    }

    // =====================================================================
    // process_message
    // =====================================================================

    #[tokio::test]
    async fn rejected_message_is_bad_request() {
        let response = app().oneshot(post_message("summarize this")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"error": "no document URL provided"}));
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let response = app().oneshot(post_message("   ")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        let expected = crate::Error::RoutingRejected(NO_SEARCH_QUERY.to_string());
        assert_eq!(value, json!({"error": expected.to_string()}));
    }

    #[tokio::test]
    async fn routed_message_streams_status_then_error() {
        let response = app()
            .oneshot(post_message("Summarize http://arxiv.org/pdf/1909.03550v1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/event-stream"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let events: Vec<Value> = text
            .split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();

        assert_eq!(events.len(), 2, "{text}");
        assert!(events[0]["status"].as_str().unwrap().starts_with("Calling summarize"));
        let error = events[1]["error"].as_str().unwrap();
        assert!(error.contains("http://127.0.0.1:1/mcp/"), "{error}");
    }

    #[tokio::test]
    async fn malformed_body_is_client_error() {
        let request = Request::post("/process_message")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"text\": 1}"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }
}
