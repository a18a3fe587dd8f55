//! MCP protocol types for the tool-invocation protocol

mod messages;
mod types;

pub use messages::*;
pub use types::*;

/// MCP protocol version spoken by default
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol versions accepted from peers, newest first
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// Pick the version to answer an `initialize` with.
///
/// A supported client version is echoed back; anything else gets the latest.
#[must_use]
pub fn negotiate_version(client_version: &str) -> &'static str {
    SUPPORTED_VERSIONS
        .iter()
        .find(|v| **v == client_version)
        .copied()
        .unwrap_or(PROTOCOL_VERSION)
}
