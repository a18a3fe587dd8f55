//! Scholar Gateway Library
//!
//! A single natural-language endpoint in front of two literature tools.
//!
//! # Components
//!
//! - **Routing**: deterministic rules pick `search` or `summarize` from free text
//! - **Streaming Gateway**: dispatches the call over MCP streamable HTTP and
//!   republishes its lifecycle as SSE `status` / `result` / `error` events
//! - **Normalization**: backend envelopes are unwrapped into one output shape
//! - **Summarization Pipeline**: fetch, extract, chunk, map and reduce a PDF
//!   into a bounded summary
//! - **Tool Service**: an MCP server exposing arXiv search and summarization
//!
//! # Protocol Version
//!
//! Speaks MCP protocol versions 2024-11-05 and 2025-03-26 (Streamable HTTP).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod normalize;
pub mod pipeline;
pub mod protocol;
pub mod routing;
pub mod tools;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
