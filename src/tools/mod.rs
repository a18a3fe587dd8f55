//! Backend tool service
//!
//! Serves registered tools over the same streamable HTTP protocol the
//! gateway speaks. Handlers return plain JSON; the server wraps it in a text
//! content block, so clients see the double-encoded envelope the gateway's
//! normalizer unwraps.

mod search;
mod server;
mod summarize;

pub use search::{ArxivSearch, Paper, parse_feed};
pub use server::{ToolServer, create_tool_router};
pub use summarize::SummarizeTool;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::protocol::Tool;

/// A tool implementation
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Tool definition advertised by `tools/list`
    fn definition(&self) -> Tool;

    /// Run the tool with the caller's arguments
    async fn call(&self, arguments: Value) -> Result<Value>;
}

/// Registered tools by name, read-only once serving
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its definition's name
    #[must_use]
    pub fn with(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.insert(handler.definition().name, handler);
        self
    }

    /// Look up a handler
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Definitions of all tools, sorted by name
    #[must_use]
    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.values().map(|h| h.definition()).collect()
    }

    /// Registered tool names
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
