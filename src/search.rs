//! Web search contract, query expansion, and context aggregation.
//!
//! The search-augmented composition never ranks or filters results: it
//! takes the top hits the provider returns, in order, and concatenates
//! their bodies.
//!
//! ```text
//! question ──▶ expand_query ──▶ WebSearch::text ──▶ join_bodies ──▶ context
//!              "UFC {q}"         ≤ 3 hits            "b1 b2 b3"
//! ```
//!
//! The concrete DuckDuckGo client lives in [`search_ddg`](crate::search_ddg).

use anyhow::Result;
use async_trait::async_trait;

use crate::models::SearchHit;

/// Number of hits requested per question.
pub const MAX_RESULTS: usize = 3;

/// Topic keyword prefixed to every question by default.
pub const DEFAULT_KEYWORD: &str = "UFC";

/// A web search provider: query in, ordered text snippets out.
///
/// Implementations own whatever connection resources they need and must
/// release them on every path, including when the query fails.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use chatbot::models::SearchHit;
/// use chatbot::search::WebSearch;
///
/// struct Canned;
///
/// #[async_trait]
/// impl WebSearch for Canned {
///     async fn text(&self, _query: &str, _max: usize) -> anyhow::Result<Vec<SearchHit>> {
///         Ok(vec![SearchHit::with_body("Jon Jones is widely considered the UFC GOAT")])
///     }
/// }
/// ```
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Run a text search, returning at most `max_results` hits in rank order.
    async fn text(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

/// Prefixes the question with the topic keyword.
pub fn expand_query(keyword: &str, question: &str) -> String {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        question.to_string()
    } else {
        format!("{} {}", keyword, question)
    }
}

/// Joins the non-empty hit bodies with a single space, keeping result order.
///
/// Returns `None` when no hit carries a usable body.
pub fn join_bodies(hits: &[SearchHit]) -> Option<String> {
    let bodies: Vec<&str> = hits
        .iter()
        .filter_map(|h| h.body.as_deref())
        .filter(|b| !b.is_empty())
        .collect();

    if bodies.is_empty() {
        None
    } else {
        Some(bodies.join(" "))
    }
}
