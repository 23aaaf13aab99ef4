//! Wikipedia search over the MediaWiki action API

use super::{truncate_chars, SearchLimits, Tool, ToolResult, MAX_QUERY_CHARS};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

const NO_RESULT: &str = "No good Wikipedia Search Result was found";

/// Looks up page titles for a query, then fetches each page's intro
pub struct WikipediaQueryTool {
    client: reqwest::Client,
    endpoint: Url,
    limits: SearchLimits,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    query: Option<ExtractQuery>,
}

#[derive(Debug, Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    pages: Vec<ExtractPage>,
}

#[derive(Debug, Deserialize)]
struct ExtractPage {
    title: String,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    missing: bool,
}

impl WikipediaQueryTool {
    pub fn new(client: reqwest::Client, endpoint: &str, limits: SearchLimits) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("Invalid Wikipedia endpoint {}", endpoint))?;
        Ok(Self {
            client,
            endpoint,
            limits,
        })
    }

    fn api_url(&self, params: &[(&str, &str)]) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("formatversion", "2")
            .extend_pairs(params);
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Wikipedia request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Wikipedia returned HTTP {}", status);
        }
        response
            .json()
            .await
            .context("Failed to parse Wikipedia response")
    }

    /// Titles of the best matching pages, at most `top_k_results`
    pub async fn search_titles(&self, query: &str) -> Result<Vec<String>> {
        let query = truncate_chars(query.trim(), MAX_QUERY_CHARS);
        let limit = self.limits.top_k_results.to_string();
        let url = self.api_url(&[
            ("action", "query"),
            ("list", "search"),
            ("srprop", ""),
            ("srsearch", &query),
            ("srlimit", &limit),
        ]);
        tracing::debug!(tool = "wikipedia", %url, "Searching Wikipedia");

        let response: SearchResponse = self.get_json(url).await?;
        Ok(response
            .query
            .map(|q| q.search.into_iter().map(|hit| hit.title).collect())
            .unwrap_or_default())
    }

    /// Plain-text intro section of a page, `None` if the page does not exist
    pub async fn page_summary(&self, title: &str) -> Result<Option<String>> {
        let url = self.api_url(&[
            ("action", "query"),
            ("prop", "extracts"),
            ("exintro", "1"),
            ("explaintext", "1"),
            ("redirects", "1"),
            ("titles", title),
        ]);
        let response: ExtractResponse = self.get_json(url).await?;
        Ok(response
            .query
            .and_then(|q| q.pages.into_iter().find(|p| !p.missing))
            .and_then(|page| page.extract)
            .map(|extract| extract.trim().to_string())
            .filter(|extract| !extract.is_empty()))
    }
}

fn format_page(title: &str, summary: &str) -> String {
    format!("Page: {}\nSummary: {}", title, summary)
}

#[async_trait]
impl Tool for WikipediaQueryTool {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn description(&self) -> &str {
        "A wrapper around Wikipedia. Useful for when you need to answer general questions \
         about people, places, companies, facts, historical events, or other subjects. \
         Input should be a search query."
    }

    async fn execute(&self, input: &str) -> Result<ToolResult> {
        let titles = self.search_titles(input).await?;

        let mut documents = Vec::new();
        for title in titles.iter().take(self.limits.top_k_results) {
            match self.page_summary(title).await {
                Ok(Some(summary)) => documents.push(format_page(title, &summary)),
                Ok(None) => tracing::debug!(tool = "wikipedia", %title, "Page has no summary"),
                // one unreachable page should not sink the whole lookup
                Err(e) => tracing::warn!(tool = "wikipedia", %title, "Page fetch failed: {:#}", e),
            }
        }

        if documents.is_empty() {
            return Ok(ToolResult::success(NO_RESULT));
        }
        Ok(ToolResult::success(self.limits.apply(&documents)))
    }
}
