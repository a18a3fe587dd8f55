//! Summarization pipeline through the public API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use scholar_gateway::backend::{Backend, EndpointTable};
use scholar_gateway::config::{PipelineConfig, WordBand};
use scholar_gateway::error::Stage;
use scholar_gateway::gateway::{StreamEvent, invoke};
use scholar_gateway::llm::Completer;
use scholar_gateway::pipeline::{Chunker, Pipeline, reassemble};
use scholar_gateway::routing::decide;
use scholar_gateway::tools::{SummarizeTool, ToolRegistry, create_tool_router};
use scholar_gateway::{Error, Result};

/// Answers map prompts with the chunk's first word, in reverse completion order
#[derive(Default)]
struct FirstWord {
    reduce_prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Completer for FirstWord {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let (instruction, body) = prompt.split_once("\n\n").unwrap_or((prompt, ""));
        if instruction.starts_with("Combine") {
            self.reduce_prompts.lock().push(body.to_string());
            return Ok(format!("final: {}", body.replace('\n', " ")));
        }
        let first = body.split_whitespace().next().unwrap_or_default().to_string();
        let delay = 40u64.saturating_sub(first.len() as u64 * 3);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(first)
    }
}

fn config(chunk_size: usize, chunk_overlap: usize, map_concurrency: usize) -> PipelineConfig {
    PipelineConfig {
        chunk_size,
        chunk_overlap,
        map_concurrency,
        ..Default::default()
    }
}

#[test]
fn chunks_cover_text_within_size() {
    let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.\n\n".repeat(40);
    let chunks = Chunker::new(200, 50).split(&text);

    assert!(chunks.len() > 1);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i);
        assert!(chunk.text.chars().count() <= 200);
        assert!(chunk.overlap <= 50);
    }
    assert_eq!(reassemble(&chunks), text);
}

#[tokio::test]
async fn reduction_input_follows_chunk_order() {
    let text = "a bb ccc dddd eeeee ffffff ggggggg hhhhhhhh";
    let completer = Arc::new(FirstWord::default());

    for concurrency in [1, 8] {
        let pipeline = Pipeline::new(
            config(8, 0, concurrency),
            Arc::clone(&completer) as Arc<dyn Completer>,
        )
        .unwrap();
        let summary = pipeline.summarize_text(text).await.unwrap();
        assert!(summary.text.starts_with("final: a "), "{}", summary.text);
    }

    let prompts = completer.reduce_prompts.lock().clone();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0], prompts[1]);
}

#[tokio::test]
async fn summarization_runs_on_a_spawned_task() {
    let pipeline = Arc::new(
        Pipeline::new(config(8, 0, 4), Arc::new(FirstWord::default()) as Arc<dyn Completer>)
            .unwrap(),
    );

    let task = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.summarize_text("alpha beta gamma delta").await })
    };

    let summary = task.await.unwrap().unwrap();
    assert!(summary.text.starts_with("final: alpha"), "{}", summary.text);
}

#[test]
fn word_bands_render_as_ranges() {
    let defaults = PipelineConfig::default();
    assert_eq!(defaults.map_words, WordBand::new(50, 75));
    assert_eq!(defaults.reduce_words.to_string(), "100-150");
}

struct NeverCalled;

#[async_trait]
impl Completer for NeverCalled {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(Error::Internal("completion not expected".into()))
    }
}

#[tokio::test]
async fn unreachable_document_surfaces_fetch_stage_through_gateway() {
    let pipeline = Pipeline::new(
        PipelineConfig {
            fetch_timeout: Duration::from_secs(2),
            ..Default::default()
        },
        Arc::new(NeverCalled),
    )
    .unwrap();
    let registry = ToolRegistry::new().with(Arc::new(SummarizeTool::new(Arc::new(pipeline))));
    let app = create_tool_router(registry, "summarize-tools");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let table = EndpointTable::default().with(
        "summarize",
        &format!("http://{addr}/mcp/"),
        Duration::from_secs(10),
    );
    let events: Vec<StreamEvent> = invoke(
        Arc::new(Backend::http(table)),
        decide("Summarize http://127.0.0.1:1/paper.pdf"),
    )
    .collect()
    .await;

    assert_eq!(events.len(), 2, "{events:?}");
    let StreamEvent::Error(message) = &events[1] else {
        panic!("expected error, got {:?}", events[1]);
    };
    assert!(message.contains("fetch stage failed"), "{message}");
    assert_eq!(Stage::Fetch.to_string(), "fetch");
}
