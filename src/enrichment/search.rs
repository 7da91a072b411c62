//! Best-effort external knowledge search.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const MAX_RESULTS: usize = 5;
const MAX_SNIPPET_CHARS: usize = 600;

/// Looks up background material for a requirement.
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<String>;
}

/// Search API speaking the Tavily request/response shape.
pub struct HttpKnowledgeSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl HttpKnowledgeSearch {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client for knowledge search")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

/// Condense a search response into prose for the generation prompt.
fn condense(body: &str) -> Result<String> {
    let parsed: SearchResponse =
        serde_json::from_str(body).context("Failed to parse knowledge search response")?;
    let mut out = String::new();
    if let Some(answer) = parsed.answer.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        out.push_str(answer);
        out.push_str("\n\n");
    }
    for hit in parsed.results.iter().take(MAX_RESULTS) {
        let content = hit.content.trim();
        if content.is_empty() {
            continue;
        }
        out.push_str(&format!(
            "- {} ({})\n  {}\n",
            hit.title.trim(),
            hit.url,
            crate::util::truncate_chars(content, MAX_SNIPPET_CHARS)
        ));
    }
    if out.trim().is_empty() {
        bail!("Knowledge search returned no usable content");
    }
    Ok(out.trim_end().to_string())
}

#[async_trait]
impl KnowledgeSearch for HttpKnowledgeSearch {
    async fn search(&self, query: &str) -> Result<String> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "basic",
            "include_answer": true,
            "max_results": MAX_RESULTS,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .context("Failed to reach knowledge search endpoint")?;
        let status = response.status();
        if !status.is_success() {
            bail!("Knowledge search returned {}", status);
        }
        let text = response
            .text()
            .await
            .context("Failed to read knowledge search response")?;
        condense(&text)
    }
}

/// Query text derived from the requirement.
pub fn build_query(requirement: &str) -> String {
    format!(
        "Freqtrade strategy best practices: {}",
        requirement.split_whitespace().collect::<Vec<_>>().join(" ")
    )
}

/// Run the search with a deadline. Any failure becomes a readable placeholder.
pub async fn search_or_placeholder(
    search: Option<&dyn KnowledgeSearch>,
    requirement: &str,
    deadline: Duration,
) -> String {
    let Some(search) = search else {
        return "Knowledge search is not configured; no external notes available.".to_string();
    };
    let query = build_query(requirement);
    match tokio::time::timeout(deadline, search.search(&query)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Knowledge search failed, continuing without it");
            format!("Knowledge search unavailable ({}).", e)
        }
        Err(_) => {
            tracing::warn!(secs = deadline.as_secs(), "Knowledge search timed out, continuing without it");
            format!("Knowledge search timed out after {}s.", deadline.as_secs())
        }
    }
}
