//! Document retrieval

use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::Stage;
use crate::{Error, Result};

/// Download `document_url` into memory, refusing bodies above `max_bytes`.
///
/// The client's timeout bounds the whole exchange.
///
/// # Errors
///
/// Returns a [`Stage::Fetch`] failure for unsupported URLs, connection
/// errors, non-success statuses and oversized documents.
pub async fn fetch_document(client: &Client, document_url: &str, max_bytes: u64) -> Result<Vec<u8>> {
    let url = Url::parse(document_url)
        .map_err(|e| Error::stage(Stage::Fetch, format!("invalid URL {document_url}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::stage(
            Stage::Fetch,
            format!("unsupported URL scheme: {}", url.scheme()),
        ));
    }

    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| Error::stage(Stage::Fetch, e))?;

    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(too_large(max_bytes));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::stage(Stage::Fetch, e))?
    {
        if (body.len() + chunk.len()) as u64 > max_bytes {
            return Err(too_large(max_bytes));
        }
        body.extend_from_slice(&chunk);
    }

    debug!(url = %document_url, bytes = body.len(), "Document downloaded");
    Ok(body)
}

fn too_large(max_bytes: u64) -> Error {
    Error::stage(
        Stage::Fetch,
        format!("document exceeds {max_bytes} byte limit"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};
    use std::time::Duration;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client() -> Client {
        Client::builder().timeout(Duration::from_secs(5)).build().unwrap()
    }

    #[tokio::test]
    async fn downloads_body() {
        let base = serve(Router::new().route("/doc.pdf", get(|| async { "%PDF-1.4 body" }))).await;
        let body = fetch_document(&client(), &format!("{base}/doc.pdf"), 1024).await.unwrap();
        assert_eq!(body, b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn http_error_is_fetch_failure() {
        let base = serve(Router::new().route(
            "/missing.pdf",
            get(|| async { (StatusCode::NOT_FOUND, "gone") }),
        ))
        .await;
        let err = fetch_document(&client(), &format!("{base}/missing.pdf"), 1024)
            .await
            .unwrap_err();
        assert_eq!(err.pipeline_stage(), Some(Stage::Fetch));
        assert!(err.to_string().contains("404"), "{err}");
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let base = serve(Router::new().route("/big.pdf", get(|| async { "x".repeat(4096) }))).await;
        let err = fetch_document(&client(), &format!("{base}/big.pdf"), 1024)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("byte limit"), "{err}");
    }

    #[tokio::test]
    async fn non_http_scheme_is_refused() {
        let err = fetch_document(&client(), "file:///etc/passwd", 1024)
            .await
            .unwrap_err();
        assert_eq!(err.pipeline_stage(), Some(Stage::Fetch));
    }

    #[tokio::test]
    async fn unreachable_host_is_fetch_failure() {
        let err = fetch_document(&client(), "http://127.0.0.1:1/doc.pdf", 1024)
            .await
            .unwrap_err();
        assert_eq!(err.pipeline_stage(), Some(Stage::Fetch));
    }
}
