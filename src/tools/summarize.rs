//! Document summarization tool

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::ToolHandler;
use crate::error::rpc_codes;
use crate::pipeline::Pipeline;
use crate::protocol::Tool;
use crate::routing::SUMMARIZE_TOOL;
use crate::{Error, Result};

/// `summarize` tool running the summarization pipeline
pub struct SummarizeTool {
    pipeline: Arc<Pipeline>,
}

impl SummarizeTool {
    /// Wrap a pipeline
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ToolHandler for SummarizeTool {
    fn definition(&self) -> Tool {
        Tool {
            name: SUMMARIZE_TOOL.to_string(),
            description: Some("Summarize the PDF document at a URL".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "document_url": {"type": "string", "description": "http(s) URL of a PDF"}
                },
                "required": ["document_url"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let url = arguments
            .get("document_url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::json_rpc(rpc_codes::INVALID_PARAMS, "document_url must be a string")
            })?;

        let summary = self.pipeline.summarize(url).await?;
        Ok(json!({ "summary": summary.text }))
    }
}
