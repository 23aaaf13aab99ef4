//! arXiv preprint search over the public Atom API

use super::{truncate_chars, SearchLimits, Tool, ToolResult, MAX_QUERY_CHARS};
use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

const NO_RESULT: &str = "No good Arxiv Result was found";

static ENTRY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<entry>(.*?)</entry>").expect("valid regex"));
static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<title[^>]*>(.*?)</title>").expect("valid regex"));
static UPDATED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<updated>\s*(\d{4}-\d{2}-\d{2})").expect("valid regex"));
static SUMMARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<summary[^>]*>(.*?)</summary>").expect("valid regex"));
static AUTHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<author>\s*<name>(.*?)</name>").expect("valid regex"));
static CDATA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[.*?\]\]>").expect("valid regex"));
static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex"));
// New-style (2301.00001v2) and old-style (hep-th/9901001) identifiers
static ARXIV_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}\.\d{4,5}(v\d+)?|[a-z\-]+(\.[A-Z]{2})?/\d{7}(v\d+)?)$").expect("valid regex")
});

/// One Atom `<entry>` reduced to the fields shown to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArxivEntry {
    pub published: String,
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
}

impl ArxivEntry {
    fn to_document(&self) -> String {
        format!(
            "Published: {}\nTitle: {}\nAuthors: {}\nSummary: {}",
            self.published,
            self.title,
            self.authors.join(", "),
            self.summary
        )
    }
}

/// Searches arXiv and returns the top entries as bounded text
pub struct ArxivQueryTool {
    client: reqwest::Client,
    endpoint: Url,
    limits: SearchLimits,
}

impl ArxivQueryTool {
    pub fn new(client: reqwest::Client, endpoint: &str, limits: SearchLimits) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("Invalid arXiv endpoint {}", endpoint))?;
        Ok(Self {
            client,
            endpoint,
            limits,
        })
    }

    /// Whether every whitespace-separated token of `query` is an arXiv identifier
    pub fn is_arxiv_identifier(query: &str) -> bool {
        let mut tokens = query.split_whitespace().peekable();
        tokens.peek().is_some() && tokens.all(|t| ARXIV_ID_RE.is_match(t))
    }

    fn request_url(&self, query: &str) -> Url {
        let query = truncate_chars(query.trim(), MAX_QUERY_CHARS);
        let max_results = self.limits.top_k_results.to_string();
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            if Self::is_arxiv_identifier(&query) {
                pairs.append_pair("id_list", &query.split_whitespace().collect::<Vec<_>>().join(","));
            } else {
                pairs.append_pair("search_query", &query);
            }
            pairs
                .append_pair("start", "0")
                .append_pair("max_results", &max_results);
        }
        url
    }

    pub async fn search(&self, query: &str) -> Result<Vec<ArxivEntry>> {
        let url = self.request_url(query);
        tracing::debug!(tool = "arxiv", %url, "Querying arXiv");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("arXiv request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("arXiv returned HTTP {}", status);
        }
        let body = response.text().await.context("Failed to read arXiv response")?;
        Ok(parse_feed(&body))
    }
}

#[async_trait]
impl Tool for ArxivQueryTool {
    fn name(&self) -> &str {
        "arxiv"
    }

    fn description(&self) -> &str {
        "A wrapper around Arxiv.org. Useful for when you need to answer questions about \
         Physics, Mathematics, Computer Science, Quantitative Biology, Quantitative Finance, \
         Statistics, Electrical Engineering, and Economics from scientific articles on \
         arxiv.org. Input should be a search query."
    }

    async fn execute(&self, input: &str) -> Result<ToolResult> {
        let entries = self.search(input).await?;
        if entries.is_empty() {
            return Ok(ToolResult::success(NO_RESULT));
        }
        let documents: Vec<String> = entries.iter().map(ArxivEntry::to_document).collect();
        Ok(ToolResult::success(self.limits.apply(&documents)))
    }
}

/// Extract entries from an arXiv Atom feed
pub fn parse_feed(xml: &str) -> Vec<ArxivEntry> {
    ENTRY_RE
        .captures_iter(xml)
        .filter_map(|entry| {
            let body = entry.get(1)?.as_str();
            let title = capture_text(&TITLE_RE, body)?;
            // API errors come back as a single entry titled "Error"
            if title == "Error" {
                return None;
            }
            Some(ArxivEntry {
                published: UPDATED_RE
                    .captures(body)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                title,
                authors: AUTHOR_RE
                    .captures_iter(body)
                    .filter_map(|c| c.get(1))
                    .map(|m| clean_text(m.as_str()))
                    .collect(),
                summary: capture_text(&SUMMARY_RE, body).unwrap_or_default(),
            })
        })
        .collect()
}

fn capture_text(re: &Regex, body: &str) -> Option<String> {
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| clean_text(m.as_str()))
}

/// Collapse whitespace and decode the XML entities arXiv emits
/// Element text as plain text: CDATA kept verbatim, references decoded, whitespace collapsed
fn clean_text(raw: &str) -> String {
    const CDATA_OPEN: usize = "<![CDATA[".len();
    const CDATA_CLOSE: usize = "]]>".len();

    let mut text = String::with_capacity(raw.len());
    let mut rest = 0;
    for cdata in CDATA_RE.find_iter(raw) {
        text.push_str(&decode_entities(&raw[rest..cdata.start()]));
        text.push_str(&raw[cdata.start() + CDATA_OPEN..cdata.end() - CDATA_CLOSE]);
        rest = cdata.end();
    }
    text.push_str(&decode_entities(&raw[rest..]));

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode character references in one pass, so `&amp;lt;` becomes `&lt;`
fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures| {
            decode_reference(&caps[1])
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_reference(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => name.strip_prefix('#')?.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
