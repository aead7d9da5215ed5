//! Context resolution: the text handed to the pipeline next to the question.
//!
//! Exactly one strategy is active per process, chosen from configuration:
//!
//! | Strategy | Source | Failure behavior |
//! |----------|--------|------------------|
//! | [`ContextSource::Search`] | live web search, top hits joined | [`ChatError::SearchUnavailable`] / [`ChatError::NoContextFound`] |
//! | [`ContextSource::Static`] | one local text file, read at startup | never fails; placeholder when the file is missing |

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::ChatError;
use crate::search::{expand_query, join_bodies, WebSearch};

/// Context substituted when the static context file does not exist.
pub const MISSING_CONTEXT: &str = "missing context";

/// Search-backed context: `"{keyword} {question}"` → top hits → joined bodies.
pub struct SearchContext {
    search: Arc<dyn WebSearch>,
    keyword: String,
    max_results: usize,
}

impl SearchContext {
    pub fn new(search: Arc<dyn WebSearch>, keyword: impl Into<String>, max_results: usize) -> Self {
        Self {
            search,
            keyword: keyword.into(),
            max_results,
        }
    }

    pub async fn resolve(&self, question: &str) -> Result<String, ChatError> {
        let query = expand_query(&self.keyword, question);
        let hits = self
            .search
            .text(&query, self.max_results)
            .await
            .map_err(ChatError::search)?;

        debug!(query = %query, hits = hits.len(), "search context retrieved");
        join_bodies(&hits).ok_or(ChatError::NoContextFound)
    }
}

/// Process-wide immutable context read from a local file once.
#[derive(Clone, Debug)]
pub struct StaticContext {
    text: Arc<str>,
}

impl StaticContext {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self { text: text.into() }
    }

    /// Reads `path` once. A missing file yields [`MISSING_CONTEXT`] instead
    /// of an error, and so does any other read failure: startup must not
    /// depend on this file.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                info!(path = %path.display(), bytes = text.len(), "loaded static context");
                Self::new(text)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "static context file not found, using placeholder");
                Self::new(MISSING_CONTEXT)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "could not read static context, using placeholder");
                Self::new(MISSING_CONTEXT)
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_placeholder(&self) -> bool {
        &*self.text == MISSING_CONTEXT
    }
}

/// The configured context strategy.
pub enum ContextSource {
    Search(SearchContext),
    Static(StaticContext),
}

impl ContextSource {
    /// Produces the context for `question`.
    pub async fn resolve(&self, question: &str) -> Result<String, ChatError> {
        match self {
            ContextSource::Search(search) => search.resolve(question).await,
            ContextSource::Static(stat) => Ok(stat.text().to_string()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContextSource::Search(_) => "search",
            ContextSource::Static(_) => "static",
        }
    }
}
