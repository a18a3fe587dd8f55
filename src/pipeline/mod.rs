//! Document summarization pipeline
//!
//! fetch -> extract -> chunk -> map -> reduce. Stages run strictly in order
//! and the first failure ends the run, tagged with its stage. Only the map
//! stage fans out, and its results are re-ordered by chunk ordinal before
//! reduction.

mod chunker;
mod extract;
mod fetch;
mod reduce;

pub use chunker::{Chunk, Chunker, reassemble};
pub use extract::{extract_pages, join_pages};
pub use fetch::fetch_document;
pub use reduce::{Summary, map_chunks, map_prompt, reduce_prompt, reduce_summaries};

use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Stage;
use crate::llm::Completer;
use crate::{Error, Result};

/// Summarization pipeline
pub struct Pipeline {
    client: Client,
    completer: Arc<dyn Completer>,
    chunker: Chunker,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the download client cannot be built.
    pub fn new(config: PipelineConfig, completer: Arc<dyn Completer>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create download client: {e}")))?;

        Ok(Self {
            client,
            completer,
            chunker: Chunker::new(config.chunk_size, config.chunk_overlap),
            config,
        })
    }

    /// Summarize the PDF at `document_url`
    ///
    /// # Errors
    ///
    /// Returns an [`Error::Pipeline`] tagged with the failing stage.
    #[tracing::instrument(skip(self), fields(url = %document_url))]
    pub async fn summarize(&self, document_url: &str) -> Result<Summary> {
        let started = Instant::now();

        let bytes =
            fetch_document(&self.client, document_url, self.config.max_document_bytes).await?;
        info!(bytes = bytes.len(), "Document downloaded");

        let pages = extract_pages(bytes).await?;
        let text = join_pages(&pages);
        info!(
            pages = pages.len(),
            chars = text.chars().count(),
            "Text extracted"
        );

        let summary = self.summarize_text(&text).await?;
        info!(
            chars = summary.text.chars().count(),
            elapsed_ms = started.elapsed().as_millis(),
            "Summary complete"
        );
        Ok(summary)
    }

    /// Run the chunk, map and reduce stages over extracted text
    ///
    /// # Errors
    ///
    /// Returns a [`Stage::Chunk`] failure when the text is blank, otherwise
    /// the map or reduce failure.
    pub async fn summarize_text(&self, text: &str) -> Result<Summary> {
        if text.trim().is_empty() {
            return Err(Error::stage(
                Stage::Chunk,
                "document contains no extractable text",
            ));
        }

        let chunks = self.chunker.split(text);
        info!(chunks = chunks.len(), "Text chunked");

        let summaries = map_chunks(
            self.completer.as_ref(),
            &chunks,
            self.config.map_words,
            self.config.map_concurrency,
        )
        .await?;

        reduce_summaries(self.completer.as_ref(), &summaries, self.config.reduce_words).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Records prompts and answers with a fixed string
    #[derive(Default)]
    struct Recorder {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Completer for Recorder {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            Ok("ok".to_string())
        }
    }

    fn pipeline(completer: Arc<dyn Completer>, chunk_size: usize) -> Pipeline {
        let config = PipelineConfig {
            chunk_size,
            chunk_overlap: 0,
            ..Default::default()
        };
        Pipeline::new(config, completer).unwrap()
    }

    #[tokio::test]
    async fn blank_text_is_chunk_failure() {
        let p = pipeline(Arc::new(Recorder::default()), 100);
        let err = p.summarize_text(" \n\n \n").await.unwrap_err();
        assert_eq!(err.pipeline_stage(), Some(Stage::Chunk));
        assert_eq!(
            err.to_string(),
            "chunk stage failed: document contains no extractable text"
        );
    }

    #[tokio::test]
    async fn one_map_call_per_chunk_then_one_reduce() {
        let recorder = Arc::new(Recorder::default());
        let p = pipeline(Arc::clone(&recorder) as Arc<dyn Completer>, 20);

        let summary = p
            .summarize_text("alpha beta gamma delta epsilon zeta eta theta")
            .await
            .unwrap();
        assert_eq!(summary.text, "ok");

        let prompts = recorder.prompts.lock().clone();
        let (reduce, maps) = prompts.split_last().unwrap();
        assert_eq!(maps.len(), summary.chunk_range.len());
        assert!(maps.iter().all(|p| p.starts_with("Summarize the following text in 50-75 words")));
        assert!(reduce.starts_with("Combine these summaries into a cohesive summary of 100-150 words"));
    }

    #[tokio::test]
    async fn bad_url_fails_before_any_completion() {
        let recorder = Arc::new(Recorder::default());
        let p = pipeline(Arc::clone(&recorder) as Arc<dyn Completer>, 100);
        let err = p.summarize("ftp://example.org/paper.pdf").await.unwrap_err();
        assert_eq!(err.pipeline_stage(), Some(Stage::Fetch));
        assert!(recorder.prompts.lock().is_empty());
    }
}
