//! Error types for Scholar Gateway

use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

/// Result type alias for Scholar Gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Summarization pipeline stage, used to tag pipeline failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Document download
    Fetch,
    /// Text extraction
    Extract,
    /// Splitting extracted text into chunks
    Chunk,
    /// Per-chunk summarization
    Map,
    /// Final combining summarization
    Reduce,
}

impl Stage {
    /// Stage name as used in logs and error messages
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Extract => "extract",
            Self::Chunk => "chunk",
            Self::Map => "map",
            Self::Reduce => "reduce",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scholar Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No tool could be determined for a message
    #[error("{0}")]
    RoutingRejected(String),

    /// Tool identifier has no entry in the endpoint table
    #[error("Invalid tool: {0}")]
    UnmappedTool(String),

    /// Connect or I/O failure talking to a backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend call exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Backend executed the tool but reported failure
    #[error("Upstream tool error: {0}")]
    UpstreamTool(String),

    /// Backend payload did not have the expected shape
    #[error("Normalization error: {0}")]
    Normalization(String),

    /// Summarization pipeline stage failure
    #[error("{stage} stage failed: {message}")]
    Pipeline {
        /// Failing stage
        stage: Stage,
        /// Underlying cause
        message: String,
    },

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
        /// Optional data
        data: Option<serde_json::Value>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a pipeline failure tagged with its stage
    pub fn stage(stage: Stage, message: impl fmt::Display) -> Self {
        Self::Pipeline {
            stage,
            message: message.to_string(),
        }
    }

    /// Stage tag, if this is a pipeline failure
    #[must_use]
    pub fn pipeline_stage(&self) -> Option<Stage> {
        match self {
            Self::Pipeline { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::JsonRpc { code, .. } => *code,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::UnmappedTool(_) => rpc_codes::METHOD_NOT_FOUND,
            Self::RoutingRejected(_) => rpc_codes::INVALID_PARAMS,
            Self::Transport(_) | Self::Timeout(_) | Self::UpstreamTool(_) => {
                rpc_codes::SERVER_ERROR_START
            }
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start
    pub const SERVER_ERROR_START: i32 = -32000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_names_stage() {
        let err = Error::stage(Stage::Fetch, "HTTP 404");
        assert_eq!(err.to_string(), "fetch stage failed: HTTP 404");
        assert_eq!(err.pipeline_stage(), Some(Stage::Fetch));
    }

    #[test]
    fn rpc_codes_follow_taxonomy() {
        assert_eq!(Error::Protocol("x".into()).to_rpc_code(), -32600);
        assert_eq!(Error::UnmappedTool("x".into()).to_rpc_code(), -32601);
        assert_eq!(Error::Transport("x".into()).to_rpc_code(), -32000);
        assert_eq!(Error::stage(Stage::Map, "x").to_rpc_code(), -32603);
        assert_eq!(Error::json_rpc(-32099, "custom").to_rpc_code(), -32099);
    }

    #[test]
    fn stage_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Stage::Reduce).unwrap(), "\"reduce\"");
    }
}
