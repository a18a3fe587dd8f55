//! PDF text extraction

use tracing::debug;

use crate::error::Stage;
use crate::{Error, Result};

/// Extract per-page text from PDF bytes, in document order.
///
/// Pages without extractable text come back as empty strings. Parsing runs
/// on the blocking pool, so a parser panic fails the join and is reported as
/// an extraction failure. This relies on the default unwinding panic
/// strategy.
///
/// # Errors
///
/// Returns a [`Stage::Extract`] failure if the document cannot be parsed.
pub async fn extract_pages(bytes: Vec<u8>) -> Result<Vec<String>> {
    let raw =
        on_blocking_pool(move || pdf_extract::extract_text_from_mem_by_pages(&bytes)).await?;

    let pages: Vec<String> = raw.iter().map(|page| tidy_page(page)).collect();
    for (number, page) in pages.iter().enumerate() {
        debug!(page = number + 1, chars = page.chars().count(), "Extracted page");
    }
    Ok(pages)
}

async fn on_blocking_pool<F>(parse: F) -> Result<Vec<String>>
where
    F: FnOnce() -> std::result::Result<Vec<String>, pdf_extract::OutputError> + Send + 'static,
{
    tokio::task::spawn_blocking(parse)
        .await
        .map_err(|e| Error::stage(Stage::Extract, format!("extractor aborted: {e}")))?
        .map_err(|e| Error::stage(Stage::Extract, e))
}

/// Drop the line breaks the extractor emits around each page's text
fn tidy_page(page: &str) -> String {
    page.trim_matches(['\n', '\r']).to_string()
}

/// Concatenate pages in order, separated by a blank line
#[must_use]
pub fn join_pages(pages: &[String]) -> String {
    pages.join("\n\n")
}
