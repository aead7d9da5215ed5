//! DuckDuckGo web search client.
//!
//! Queries the JavaScript-free HTML endpoint and scrapes result blocks.
//! No API key is needed. DuckDuckGo throttles aggressive callers by
//! answering `202 Accepted` with a challenge page instead of results; that
//! is reported as an error rather than as an empty result list, so the
//! caller can tell "search is down" from "nothing found".

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::models::SearchHit;
use crate::search::WebSearch;

pub const DEFAULT_BASE_URL: &str = "https://html.duckduckgo.com";

/// [`WebSearch`] implementation backed by `html.duckduckgo.com`.
#[derive(Clone)]
pub struct DuckDuckGo {
    http: Client,
    base_url: String,
}

impl DuckDuckGo {
    /// Builds a client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(crate::USER_AGENT)
            .build()
            .context("Failed to build search HTTP client")?;
        Ok(Self::with_base_url(http, base_url))
    }

    /// Points the client at another host (used by tests with a mock server).
    pub fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl WebSearch for DuckDuckGo {
    async fn text(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/html/", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("q", query)])
            .send()
            .await
            .context("DuckDuckGo request failed")?;

        let status = response.status();
        if status != StatusCode::OK {
            bail!("DuckDuckGo returned HTTP {} (throttled or unavailable)", status);
        }

        let html = response
            .text()
            .await
            .context("Failed to read DuckDuckGo response body")?;

        let hits = parse_results(&html, max_results)?;
        debug!(query, hits = hits.len(), "duckduckgo search complete");
        Ok(hits)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector '{}': {:?}", css, e))
}

/// Extracts up to `max_results` organic hits from a DuckDuckGo HTML page.
pub fn parse_results(html: &str, max_results: usize) -> Result<Vec<SearchHit>> {
    let doc = Html::parse_document(html);
    let result_sel = selector("div.result")?;
    let title_sel = selector("a.result__a")?;
    let snippet_sel = selector(".result__snippet")?;

    let mut hits = Vec::new();
    for block in doc.select(&result_sel) {
        if hits.len() >= max_results {
            break;
        }
        if block.value().classes().any(|c| c == "result--ad") {
            continue;
        }

        let link = block.select(&title_sel).next();
        let title = link.map(element_text).filter(|t| !t.is_empty());
        let href = link
            .and_then(|a| a.value().attr("href"))
            .map(unwrap_redirect);
        let body = block
            .select(&snippet_sel)
            .next()
            .map(element_text)
            .filter(|b| !b.is_empty());

        if title.is_none() && body.is_none() {
            continue;
        }
        hits.push(SearchHit { title, href, body });
    }

    Ok(hits)
}

/// Collapses an element's text nodes into single-spaced text.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves `//duckduckgo.com/l/?uddg=<target>` redirect links to the target.
fn unwrap_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };

    Url::parse(&absolute)
        .ok()
        .filter(|u| u.path() == "/l/")
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(absolute)
}
