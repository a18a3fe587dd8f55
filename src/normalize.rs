//! Response normalization
//!
//! Backends answer `tools/call` with collaborator-defined shapes: content
//! block envelopes, JSON documents double-encoded inside text blocks, plain
//! records. [`normalize`] folds all of them into the canonical shape clients
//! see. It is total: unexpected input degrades instead of failing.

use std::fmt::Debug;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

/// Normalize a raw backend payload.
///
/// Rules, most specific first:
/// - a one-element array whose element is `{"type": "text", "text": ...}`
///   is a double-encoded document: the text is parsed as JSON and returned;
///   unparseable text yields `{"error": "Invalid response format: ..."}`
/// - objects are normalized value by value, keys and order preserved
/// - arrays are normalized element by element, order preserved
/// - primitives pass through
#[must_use]
pub fn normalize(raw: Value) -> Value {
    match raw {
        Value::Array(items) => match embedded_text(&items) {
            Some(text) => decode_embedded(text),
            None => Value::Array(items.into_iter().map(normalize).collect()),
        },
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, normalize(value)))
                .collect::<Map<_, _>>(),
        ),
        primitive => primitive,
    }
}

/// Normalize any serializable payload.
///
/// Payloads that cannot be represented as JSON (e.g. maps with non-string
/// keys) fall back to their debug text.
pub fn normalize_any<T: Serialize + Debug>(raw: &T) -> Value {
    match serde_json::to_value(raw) {
        Ok(value) => normalize(value),
        Err(e) => {
            warn!(error = %e, "Converting non-JSON payload to text");
            Value::String(format!("{raw:?}"))
        }
    }
}

/// Text of a lone `{"type": "text", "text": "..."}` block
fn embedded_text(items: &[Value]) -> Option<&str> {
    let [Value::Object(block)] = items else {
        return None;
    };
    if block.get("type").and_then(Value::as_str) != Some("text") {
        return None;
    }
    block.get("text").and_then(Value::as_str)
}

fn decode_embedded(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(parsed) => {
            if !parsed.is_array() {
                debug!("Embedded document is not a sequence; returning as-is");
            }
            parsed
        }
        Err(e) => {
            warn!(error = %e, "Embedded text is not valid JSON");
            json!({ "error": format!("Invalid response format: {e}") })
        }
    }
}
