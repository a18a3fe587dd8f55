//! Rule-based tool routing
//!
//! Maps a free-form message to exactly one tool call, or to a rejection.
//! Rules are evaluated in order and the first applicable rule decides; there
//! is no model in the loop, so every decision can be reproduced from the
//! message text alone.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::Error;

/// Literature search tool identifier
pub const SEARCH_TOOL: &str = "search";
/// Document summarization tool identifier
pub const SUMMARIZE_TOOL: &str = "summarize";
/// Result count requested for every routed search
pub const DEFAULT_MAX_RESULTS: u64 = 5;
/// Qualifier prepended to queries that look like arXiv identifiers
pub const ID_QUERY_PREFIX: &str = "id_list:";

/// Rejection reason when a summary is requested without a document
pub const NO_DOCUMENT_URL: &str = "no document URL provided";
/// Rejection reason when nothing is left to search for
pub const NO_SEARCH_QUERY: &str = "no search query provided";

/// A single routed tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    /// Tool identifier
    pub tool: String,
    /// Normalized arguments
    pub args: Map<String, Value>,
}

impl ToolCall {
    fn new(tool: &str, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            tool: tool.to_string(),
            args,
        }
    }
}

/// Outcome of routing one message
#[derive(Debug, Clone, PartialEq)]
pub enum ToolDecision {
    /// Invoke a tool
    Invoke(ToolCall),
    /// No tool can serve the message
    Reject {
        /// Human-readable reason
        reason: String,
    },
}

impl ToolDecision {
    fn reject(reason: &str) -> Self {
        Self::Reject {
            reason: reason.to_string(),
        }
    }

    /// Tool identifier, if a tool was selected
    #[must_use]
    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::Invoke(call) => Some(&call.tool),
            Self::Reject { .. } => None,
        }
    }

    /// Rejection reason, if no tool was selected
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Invoke(_) => None,
            Self::Reject { reason } => Some(reason),
        }
    }

    /// The routed call, or [`Error::RoutingRejected`] with the reason
    ///
    /// # Errors
    ///
    /// Fails when no tool can serve the message.
    pub fn into_call(self) -> crate::Result<ToolCall> {
        match self {
            Self::Invoke(call) => Ok(call),
            Self::Reject { reason } => Err(Error::RoutingRejected(reason)),
        }
    }
}

// Wire shape: {"tool": ..., "args": {...}, "reason": ...} with exactly one of
// tool/reason non-null.
impl Serialize for ToolDecision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Record<'a> {
            tool: Option<&'a str>,
            args: &'a Map<String, Value>,
            reason: Option<&'a str>,
        }

        let empty = Map::new();
        let record = match self {
            Self::Invoke(call) => Record {
                tool: Some(&call.tool),
                args: &call.args,
                reason: None,
            },
            Self::Reject { reason } => Record {
                tool: None,
                args: &empty,
                reason: Some(reason),
            },
        };
        record.serialize(serializer)
    }
}

/// Message prepared for rule evaluation
struct Message<'a> {
    /// Trimmed, original case (URLs are extracted from here)
    trimmed: &'a str,
    /// Trimmed and lowercased
    normalized: String,
}

/// One routing rule: when `applies` matches, `decide` produces the outcome
struct Rule {
    name: &'static str,
    applies: fn(&Message<'_>) -> bool,
    decide: fn(&Message<'_>) -> ToolDecision,
}

/// Ordered rule table; the last rule always applies
const RULES: &[Rule] = &[
    Rule {
        name: SUMMARIZE_TOOL,
        applies: wants_summary,
        decide: summarize_decision,
    },
    Rule {
        name: SEARCH_TOOL,
        applies: always,
        decide: search_decision,
    },
];

/// Decide which tool serves `message`
#[must_use]
pub fn decide(message: &str) -> ToolDecision {
    let trimmed = message.trim();
    let msg = Message {
        trimmed,
        normalized: trimmed.to_lowercase(),
    };

    for rule in RULES {
        if (rule.applies)(&msg) {
            let decision = (rule.decide)(&msg);
            debug!(rule = rule.name, decision = ?decision, "Routing decision");
            return decision;
        }
    }

    // The search rule is unconditional
    ToolDecision::reject(NO_SEARCH_QUERY)
}

fn document_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Either a `.pdf` path or an arXiv-style `/pdf/<id>` path
    RE.get_or_init(|| Regex::new(r"(?i)https?://\S+\.pdf|https?://\S+/pdf/\S+").unwrap())
}

fn search_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bsearch\b").unwrap())
}

fn re_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bre\b").unwrap())
}

fn arxiv_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}\.\d{5}").unwrap())
}

/// First document URL in the message, original case preserved, without
/// sentence punctuation that trails it
fn find_document_url(text: &str) -> Option<&str> {
    document_url_re()
        .find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', ')', '!']))
}

fn always(_: &Message<'_>) -> bool {
    true
}

fn wants_summary(msg: &Message<'_>) -> bool {
    msg.normalized.contains("summarize") || find_document_url(msg.trimmed).is_some()
}

fn summarize_decision(msg: &Message<'_>) -> ToolDecision {
    // Asking for a summary without a target never falls back to search
    match find_document_url(msg.trimmed) {
        Some(url) => ToolDecision::Invoke(ToolCall::new(
            SUMMARIZE_TOOL,
            json!({ "document_url": url }),
        )),
        None => ToolDecision::reject(NO_DOCUMENT_URL),
    }
}

fn search_decision(msg: &Message<'_>) -> ToolDecision {
    let query = clean_query(&msg.normalized);
    if query.is_empty() {
        return ToolDecision::reject(NO_SEARCH_QUERY);
    }

    ToolDecision::Invoke(ToolCall::new(
        SEARCH_TOOL,
        json!({ "query": query, "max_results": DEFAULT_MAX_RESULTS }),
    ))
}

/// Turn a normalized message into search query text.
///
/// Drops the standalone word "search", expands the standalone word "re" to
/// "related" (imprecise: a query genuinely about "re" is rewritten too), and
/// prefixes identifier-looking queries with [`ID_QUERY_PREFIX`]. The prefix
/// applies to the whole cleaned string, free-text terms included.
#[must_use]
pub fn clean_query(normalized: &str) -> String {
    let without_keyword = search_keyword_re().replace_all(normalized, " ");
    let expanded = re_token_re().replace_all(&without_keyword, "related");
    let query = expanded.split_whitespace().collect::<Vec<_>>().join(" ");

    if !query.is_empty() && arxiv_id_re().is_match(&query) {
        format!("{ID_QUERY_PREFIX}{query}")
    } else {
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn invoke(tool: &str, args: Value) -> ToolDecision {
        ToolDecision::Invoke(ToolCall::new(tool, args))
    }

    #[test]
    fn search_with_re_expansion() {
        assert_eq!(
            decide("Search machine learning re papers"),
            invoke(
                SEARCH_TOOL,
                json!({"query": "machine learning related papers", "max_results": 5})
            )
        );
    }

    #[test]
    fn summarize_arxiv_pdf_path() {
        assert_eq!(
            decide("Summarize http://arxiv.org/pdf/1909.03550v1"),
            invoke(
                SUMMARIZE_TOOL,
                json!({"document_url": "http://arxiv.org/pdf/1909.03550v1"})
            )
        );
    }

    #[test]
    fn trailing_sentence_punctuation_is_not_part_of_url() {
        for message in [
            "Summarize http://arxiv.org/pdf/1909.03550v1.",
            "Summarize (http://arxiv.org/pdf/1909.03550v1), thanks",
            "Summarize http://arxiv.org/pdf/1909.03550v1;",
        ] {
            assert_eq!(
                decide(message),
                invoke(
                    SUMMARIZE_TOOL,
                    json!({"document_url": "http://arxiv.org/pdf/1909.03550v1"})
                ),
                "{message}"
            );
        }
        assert_eq!(
            find_document_url("read https://host/papers/v1.2.pdf."),
            Some("https://host/papers/v1.2.pdf")
        );
    }

    #[test]
    fn rejection_converts_to_routing_error() {
        let err = decide("summarize").into_call().unwrap_err();
        assert!(matches!(err, Error::RoutingRejected(ref r) if r == NO_DOCUMENT_URL));
        assert_eq!(err.to_string(), NO_DOCUMENT_URL);
        assert_eq!(err.to_rpc_code(), crate::error::rpc_codes::INVALID_PARAMS);

        let call = decide("search graphs").into_call().unwrap();
        assert_eq!(call.tool, SEARCH_TOOL);
    }

    #[test]
    fn pdf_url_without_keyword_routes_to_summarize() {
        let decision = decide("what does https://example.org/papers/Attention.pdf say?");
        assert_eq!(
            decision,
            invoke(
                SUMMARIZE_TOOL,
                json!({"document_url": "https://example.org/papers/Attention.pdf"})
            )
        );
    }

    #[test]
    fn first_pdf_url_wins() {
        let decision = decide("compare https://a.org/one.pdf and https://b.org/two.pdf");
        assert_eq!(
            decision,
            invoke(SUMMARIZE_TOOL, json!({"document_url": "https://a.org/one.pdf"}))
        );
    }

    #[test]
    fn summarize_without_url_is_rejected() {
        for message in [
            "summarize",
            "Please SUMMARIZE the transformer paper",
            "search and summarize graph networks",
            "summarize http://example.org/index.html",
        ] {
            let decision = decide(message);
            assert_eq!(decision.tool(), None, "{message}");
            assert_eq!(decision.reason(), Some(NO_DOCUMENT_URL), "{message}");
        }
    }

    #[test]
    fn empty_query_is_rejected() {
        for message in ["", "   ", "search", "  Search  "] {
            assert_eq!(decide(message).reason(), Some(NO_SEARCH_QUERY), "{message:?}");
        }
    }

    #[test]
    fn arxiv_identifier_gets_qualifier() {
        assert_eq!(
            decide("search 1605.08386"),
            invoke(
                SEARCH_TOOL,
                json!({"query": "id_list:1605.08386", "max_results": 5})
            )
        );
    }

    #[test]
    fn identifier_qualifier_applies_to_whole_query() {
        assert_eq!(clean_query("paper 2101.00001 details"), "id_list:paper 2101.00001 details");
    }

    #[test]
    fn search_keyword_only_removed_as_word() {
        assert_eq!(clean_query("research on search engines"), "research on engines");
    }

    #[test]
    fn re_expansion_respects_word_boundaries() {
        assert_eq!(clean_query("re ranking"), "related ranking");
        assert_eq!(clean_query("retrieval and reinforcement"), "retrieval and reinforcement");
    }

    #[test]
    fn plain_message_becomes_lowercased_query() {
        assert_eq!(
            decide("  Quantum Computing  "),
            invoke(SEARCH_TOOL, json!({"query": "quantum computing", "max_results": 5}))
        );
    }

    #[test]
    fn decision_wire_shape() {
        let accepted = serde_json::to_value(decide("graph neural networks")).unwrap();
        assert_eq!(
            accepted,
            json!({
                "tool": "search",
                "args": {"query": "graph neural networks", "max_results": 5},
                "reason": null
            })
        );

        let rejected = serde_json::to_value(decide("summarize")).unwrap();
        assert_eq!(
            rejected,
            json!({"tool": null, "args": {}, "reason": NO_DOCUMENT_URL})
        );
    }

    #[test]
    fn routing_is_deterministic() {
        let message = "Search diffusion models re images";
        assert_eq!(decide(message), decide(message));
    }
}
