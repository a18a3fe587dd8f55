//! Map and reduce summarization

use std::ops::Range;

use futures::stream::{self, StreamExt};
use tracing::debug;

use super::chunker::Chunk;
use crate::config::WordBand;
use crate::error::Stage;
use crate::llm::Completer;
use crate::{Error, Result};

/// Summary of one chunk or of a chunk range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Generated text
    pub text: String,
    /// Ordinals of the chunks this summary covers
    pub chunk_range: Range<usize>,
}

/// Prompt requesting a summary of one chunk
#[must_use]
pub fn map_prompt(chunk: &str, band: WordBand) -> String {
    format!("Summarize the following text in {band} words:\n\n{chunk}")
}

/// Prompt requesting a combined summary of per-chunk summaries
#[must_use]
pub fn reduce_prompt(summaries: &[Summary], band: WordBand) -> String {
    let combined = summaries
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    format!("Combine these summaries into a cohesive summary of {band} words:\n\n{combined}")
}

/// Summarize every chunk, up to `concurrency` calls at a time.
///
/// Results are slotted by chunk ordinal, so the returned order never depends
/// on which call finished first. The first failure aborts the stage.
///
/// # Errors
///
/// Returns a [`Stage::Map`] failure naming the chunk whose call failed.
pub async fn map_chunks(
    completer: &dyn Completer,
    chunks: &[Chunk],
    band: WordBand,
    concurrency: usize,
) -> Result<Vec<Summary>> {
    let mut slots: Vec<Option<Summary>> = vec![None; chunks.len()];

    // Owned jobs keep the stream free of borrows into `chunks`.
    let jobs: Vec<(usize, String)> = chunks
        .iter()
        .map(|chunk| (chunk.index, map_prompt(&chunk.text, band)))
        .collect();
    let mut calls = stream::iter(jobs)
        .map(|(index, prompt)| async move { (index, completer.complete(&prompt).await) })
        .buffer_unordered(concurrency.max(1));

    while let Some((index, outcome)) = calls.next().await {
        let text = outcome
            .map_err(|e| Error::stage(Stage::Map, format!("chunk {}: {e}", index + 1)))?;
        debug!(chunk = index + 1, chars = text.chars().count(), "Chunk summarized");
        slots[index] = Some(Summary {
            text,
            chunk_range: index..index + 1,
        });
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                Error::stage(Stage::Map, format!("chunk {} produced no summary", index + 1))
            })
        })
        .collect()
}

/// Combine per-chunk summaries, in ordinal order, into the final summary
///
/// # Errors
///
/// Returns a [`Stage::Reduce`] failure if there is nothing to combine or the
/// completion call fails.
pub async fn reduce_summaries(
    completer: &dyn Completer,
    summaries: &[Summary],
    band: WordBand,
) -> Result<Summary> {
    let (Some(first), Some(last)) = (summaries.first(), summaries.last()) else {
        return Err(Error::stage(Stage::Reduce, "no chunk summaries to combine"));
    };
    let chunk_range = first.chunk_range.start..last.chunk_range.end;

    let text = completer
        .complete(&reduce_prompt(summaries, band))
        .await
        .map_err(|e| Error::stage(Stage::Reduce, e))?;

    Ok(Summary { text, chunk_range })
}
