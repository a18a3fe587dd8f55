//! Gateway against a live tool server on an ephemeral port

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use scholar_gateway::backend::{Backend, EndpointTable};
use scholar_gateway::error::rpc_codes;
use scholar_gateway::gateway::{AppState, StreamEvent, create_router, invoke};
use scholar_gateway::protocol::Tool;
use scholar_gateway::routing::decide;
use scholar_gateway::tools::{ToolHandler, ToolRegistry, create_tool_router};
use scholar_gateway::{Error, Result};

/// Answers with a canned value, or fails with a canned message
struct Stub {
    name: &'static str,
    outcome: std::result::Result<Value, &'static str>,
    delay: Duration,
}

impl Stub {
    fn ok(name: &'static str, value: Value) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcome: Ok(value),
            delay: Duration::ZERO,
        })
    }

    fn failing(name: &'static str, message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcome: Err(message),
            delay: Duration::ZERO,
        })
    }

    fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcome: Ok(json!([])),
            delay,
        })
    }
}

#[async_trait]
impl ToolHandler for Stub {
    fn definition(&self) -> Tool {
        Tool {
            name: self.name.to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
        }
    }

    async fn call(&self, _arguments: Value) -> Result<Value> {
        tokio::time::sleep(self.delay).await;
        match &self.outcome {
            Ok(value) => Ok(value.clone()),
            Err(message) => Err(Error::json_rpc(rpc_codes::SERVER_ERROR_START, *message)),
        }
    }
}

/// Serve `handlers` on 127.0.0.1:0 and return the MCP endpoint URL
async fn serve_tools(handlers: Vec<Arc<Stub>>) -> String {
    let registry = handlers
        .into_iter()
        .fold(ToolRegistry::new(), |registry, h| registry.with(h));
    let app = create_tool_router(registry, "stub-tools");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/mcp/")
}

fn backend(url: &str, timeout: Duration) -> Arc<Backend> {
    let table = EndpointTable::default()
        .with("search", url, timeout)
        .with("summarize", url, timeout);
    Arc::new(Backend::http(table))
}

async fn run(backend: Arc<Backend>, message: &str) -> Vec<StreamEvent> {
    invoke(backend, decide(message)).collect().await
}

#[tokio::test]
async fn search_streams_status_then_normalized_result() {
    let papers = json!([{
        "title": "Attention Is All You Need",
        "authors": ["Ashish Vaswani"],
        "pdf_url": "http://arxiv.org/pdf/1706.03762v7"
    }]);
    let url = serve_tools(vec![Stub::ok("search", papers.clone())]).await;

    let events = run(backend(&url, Duration::from_secs(5)), "search attention models").await;

    assert_eq!(events.len(), 2, "{events:?}");
    assert_eq!(
        events[0],
        StreamEvent::Status(
            "Calling search with args {\"query\":\"attention models\",\"max_results\":5}"
                .to_string()
        )
    );
    assert_eq!(events[1], StreamEvent::Result(papers));
}

#[tokio::test]
async fn zero_results_is_empty_sequence() {
    let url = serve_tools(vec![Stub::ok("search", json!([]))]).await;

    let events = run(backend(&url, Duration::from_secs(5)), "quantum gravity").await;

    assert_eq!(events.last(), Some(&StreamEvent::Result(json!([]))));
}

#[tokio::test]
async fn summarize_result_is_summary_record() {
    let url = serve_tools(vec![Stub::ok("summarize", json!({"summary": "Short."}))]).await;

    let events = run(
        backend(&url, Duration::from_secs(5)),
        "Summarize http://arxiv.org/pdf/1909.03550v1",
    )
    .await;

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], StreamEvent::Status(s) if s.starts_with("Calling summarize")));
    assert_eq!(events[1], StreamEvent::Result(json!({"summary": "Short."})));
}

#[tokio::test]
async fn tool_error_becomes_error_event() {
    let url = serve_tools(vec![Stub::failing("search", "Error fetching data: 503")]).await;

    let events = run(backend(&url, Duration::from_secs(5)), "dark matter").await;

    assert_eq!(events.len(), 2);
    let StreamEvent::Error(message) = &events[1] else {
        panic!("expected error, got {:?}", events[1]);
    };
    assert!(message.starts_with(&format!("Error calling search at {url}")), "{message}");
    assert!(message.ends_with("Error fetching data: 503"), "{message}");
}

#[tokio::test]
async fn connect_failure_is_status_then_error_naming_endpoint() {
    let url = "http://127.0.0.1:1/mcp/";

    let events = run(
        backend(url, Duration::from_secs(5)),
        "Summarize http://arxiv.org/pdf/1909.03550v1",
    )
    .await;

    assert_eq!(events.len(), 2, "{events:?}");
    assert!(matches!(events[0], StreamEvent::Status(_)));
    let StreamEvent::Error(message) = &events[1] else {
        panic!("expected error, got {:?}", events[1]);
    };
    assert!(message.contains(url), "{message}");
}

#[tokio::test]
async fn slow_tool_times_out() {
    let url = serve_tools(vec![Stub::slow("search", Duration::from_secs(5))]).await;

    let events = run(backend(&url, Duration::from_millis(300)), "slow query").await;

    assert_eq!(events.len(), 2);
    let StreamEvent::Error(message) = &events[1] else {
        panic!("expected error, got {:?}", events[1]);
    };
    assert!(message.contains("Timed out"), "{message}");
}

#[tokio::test]
async fn process_message_streams_sse_frames() {
    let url = serve_tools(vec![Stub::ok("search", json!([]))]).await;
    let state = Arc::new(AppState {
        backend: backend(&url, Duration::from_secs(5)),
        keep_alive: Duration::ZERO,
    });
    let app = create_router(state, 64 * 1024);

    let request = Request::post("/process_message")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"message": "search graph neural networks"}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let frames: Vec<Value> = text
        .split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    assert_eq!(
        frames,
        vec![
            json!({"status": "Calling search with args {\"query\":\"graph neural networks\",\"max_results\":5}"}),
            json!({"result": []}),
        ]
    );
}
