//! arXiv literature search

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::ToolHandler;
use crate::config::SearchConfig;
use crate::error::rpc_codes;
use crate::protocol::Tool;
use crate::routing::{DEFAULT_MAX_RESULTS, ID_QUERY_PREFIX, SEARCH_TOOL};
use crate::{Error, Result};

const NO_TITLE: &str = "No title available";
const NO_AUTHORS: &str = "No authors available";
const NO_PDF: &str = "No PDF available";

/// One search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paper {
    /// Title, whitespace collapsed
    pub title: String,
    /// Author names in feed order
    pub authors: Vec<String>,
    /// Link to the PDF rendition
    pub pdf_url: String,
}

/// `search` tool backed by the arXiv Atom API
pub struct ArxivSearch {
    client: Client,
    base_url: String,
}

impl ArxivSearch {
    /// Create the tool
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the HTTP client cannot be built.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create search client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// Run a query and parse the feed
    ///
    /// # Errors
    ///
    /// Returns a JSON-RPC error carrying a human-readable message when the
    /// request or the feed parse fails.
    pub async fn search(&self, query: &str, max_results: u64) -> Result<Vec<Paper>> {
        let max_results = max_results.to_string();
        let (key, value) = match query.strip_prefix(ID_QUERY_PREFIX) {
            Some(ids) => ("id_list", ids.trim()),
            None => ("search_query", query),
        };

        let body = self
            .client
            .get(&self.base_url)
            .query(&[(key, value), ("start", "0"), ("max_results", max_results.as_str())])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_error)?
            .text()
            .await
            .map_err(fetch_error)?;

        let papers = parse_feed(&body).map_err(|e| {
            Error::json_rpc(
                rpc_codes::INTERNAL_ERROR,
                format!("Error parsing the API response: {e}"),
            )
        })?;

        info!(query = %query, results = papers.len(), "arXiv search complete");
        Ok(papers)
    }
}

#[async_trait]
impl ToolHandler for ArxivSearch {
    fn definition(&self) -> Tool {
        Tool {
            name: SEARCH_TOOL.to_string(),
            description: Some("Search for papers on arxiv.org".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search text, or id_list:<arXiv id>"},
                    "max_results": {"type": "integer", "minimum": 1, "default": DEFAULT_MAX_RESULTS}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::json_rpc(rpc_codes::INVALID_PARAMS, "query must be a string"))?;
        let max_results = parse_max_results(arguments.get("max_results"))?;

        let papers = self.search(query, max_results).await?;
        Ok(serde_json::to_value(papers)?)
    }
}

fn fetch_error(e: reqwest::Error) -> Error {
    Error::json_rpc(
        rpc_codes::SERVER_ERROR_START,
        format!("Error fetching data: {e}"),
    )
}

/// Accepts a positive integer or its decimal string form; absent means the default
fn parse_max_results(value: Option<&Value>) -> Result<u64> {
    let parsed = match value {
        None | Some(Value::Null) => Some(DEFAULT_MAX_RESULTS),
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(_) => None,
    };
    parsed.filter(|n| *n >= 1).ok_or_else(|| {
        Error::json_rpc(
            rpc_codes::INVALID_PARAMS,
            "max_results must be a positive integer",
        )
    })
}

#[derive(Default)]
struct EntryBuilder {
    title: Option<String>,
    authors: Vec<String>,
    pdf_url: Option<String>,
}

impl EntryBuilder {
    fn build(self) -> Paper {
        Paper {
            title: self
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| NO_TITLE.to_string()),
            authors: if self.authors.is_empty() {
                vec![NO_AUTHORS.to_string()]
            } else {
                self.authors
            },
            pdf_url: self.pdf_url.unwrap_or_else(|| NO_PDF.to_string()),
        }
    }

    fn read_link(&mut self, link: &BytesStart<'_>) -> std::result::Result<(), quick_xml::Error> {
        let is_pdf = link
            .try_get_attribute("type")?
            .is_some_and(|a| a.value.as_ref() == b"application/pdf");
        if is_pdf && self.pdf_url.is_none() {
            if let Some(href) = link.try_get_attribute("href")? {
                self.pdf_url = Some(href.unescape_value()?.into_owned());
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    AuthorName,
}

/// Parse an arXiv Atom feed into papers, in feed order
///
/// # Errors
///
/// Returns the XML reader's error for malformed documents.
pub fn parse_feed(xml: &str) -> std::result::Result<Vec<Paper>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut papers = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"entry" => entry = Some(EntryBuilder::default()),
                b"author" if entry.is_some() => in_author = true,
                b"title" if entry.is_some() && !in_author => {
                    field = Some(Field::Title);
                    text.clear();
                }
                b"name" if in_author => {
                    field = Some(Field::AuthorName);
                    text.clear();
                }
                b"link" => {
                    if let Some(entry) = entry.as_mut() {
                        entry.read_link(&e)?;
                    }
                }
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"link" {
                    if let Some(entry) = entry.as_mut() {
                        entry.read_link(&e)?;
                    }
                }
            }
            Event::Text(t) if field.is_some() => text.push_str(&String::from_utf8_lossy(&t)),
            Event::CData(t) if field.is_some() => text.push_str(&String::from_utf8_lossy(&t)),
            Event::GeneralRef(r) if field.is_some() => push_reference(&mut text, &r)?,
            Event::End(e) => match e.local_name().as_ref() {
                b"title" | b"name" => {
                    if let (Some(f), Some(entry)) = (field.take(), entry.as_mut()) {
                        let value = collapse_whitespace(&text);
                        match f {
                            Field::Title => entry.title = Some(value),
                            Field::AuthorName if !value.is_empty() => entry.authors.push(value),
                            Field::AuthorName => {}
                        }
                    }
                }
                b"author" => in_author = false,
                b"entry" => {
                    if let Some(done) = entry.take() {
                        papers.push(done.build());
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    debug!(entries = papers.len(), "Parsed Atom feed");
    Ok(papers)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Append the text a `&...;` reference stands for; unknown entities stay verbatim
fn push_reference(
    text: &mut String,
    reference: &BytesRef<'_>,
) -> std::result::Result<(), quick_xml::Error> {
    if let Some(ch) = reference.resolve_char_ref()? {
        text.push(ch);
        return Ok(());
    }
    let name = String::from_utf8_lossy(reference);
    match resolve_predefined_entity(&name) {
        Some(resolved) => text.push_str(resolved),
        None => {
            text.push('&');
            text.push_str(&name);
            text.push(';');
        }
    }
    Ok(())
}
