//! Streamed tool invocation
//!
//! [`invoke`] turns one routing decision into a finite event sequence:
//! zero or more `status` events, then exactly one `result` or `error`.
//! The sequence is lazy; nothing is sent to a backend until it is polled,
//! and dropping it part-way releases the backend session.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::normalize::normalize;
use crate::routing::ToolDecision;

/// One unit of an invocation's event sequence.
///
/// Wire shape: `{"status": "..."}`, `{"result": <value>}`, `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEvent {
    /// Progress notice
    Status(String),
    /// Normalized tool output (terminal)
    Result(Value),
    /// Human-readable failure (terminal)
    Error(String),
}

impl StreamEvent {
    /// Whether this event ends the sequence
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Status(_))
    }

    /// Render as an SSE `data:` frame
    #[must_use]
    pub fn to_sse(&self) -> Event {
        Event::default()
            .json_data(self)
            .unwrap_or_else(|e| Event::default().data(format!("{{\"error\":\"{e}\"}}")))
    }
}

/// Invoke the tool selected by `decision` and stream its lifecycle.
///
/// A rejected decision is never dispatched; it yields a single `error`
/// event carrying the reason. Callers are expected to surface rejections
/// before opening a stream.
pub fn invoke(backend: Arc<Backend>, decision: ToolDecision) -> impl Stream<Item = StreamEvent> {
    stream! {
        let call = match decision.into_call() {
            Ok(call) => call,
            Err(e) => {
                yield StreamEvent::Error(e.to_string());
                return;
            }
        };

        let endpoint = match backend.endpoints().resolve(&call.tool) {
            Ok(endpoint) => endpoint.clone(),
            Err(e) => {
                warn!(tool = %call.tool, "No endpoint mapped for tool");
                yield StreamEvent::Error(e.to_string());
                return;
            }
        };

        yield StreamEvent::Status(format!(
            "Calling {} with args {}",
            call.tool,
            Value::Object(call.args.clone())
        ));

        info!(tool = %call.tool, url = %endpoint.url, "Invoking tool");
        match backend.call_tool(&endpoint, call.args).await {
            Ok(raw) => yield StreamEvent::Result(normalize(raw)),
            Err(e) => {
                yield StreamEvent::Error(format!(
                    "Error calling {} at {}: {e}",
                    call.tool, endpoint.url
                ));
            }
        }
    }
}

/// Wrap an invocation stream as an SSE response
pub fn sse_response<S>(events: S, keep_alive: Duration) -> Response
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let frames = events.map(|event| Ok::<_, Infallible>(event.to_sse()));

    if keep_alive.is_zero() {
        Sse::new(frames).into_response()
    } else {
        Sse::new(frames)
            .keep_alive(KeepAlive::new().interval(keep_alive))
            .into_response()
    }
}
