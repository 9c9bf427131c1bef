//! Web search tool backed by the Exa API
//!
//! [`ExaClient`] is shared with the web content tool.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{parse_args, schema_for, Tool};
use crate::config::WebSettings;
use crate::conversation::{Arguments, ToolResult};
use crate::error::ToolExecutionError;

const NAME: &str = "web_search";
const DEFAULT_TOPN: u32 = 10;

// ============================================================================
// Exa Client
// ============================================================================

/// One document returned by Exa search or contents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExaResult {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ExaResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    num_results: u32,
    text: bool,
    highlights: bool,
    summary: bool,
}

#[derive(Debug, Serialize)]
struct ContentsRequest<'a> {
    ids: [&'a str; 1],
    text: bool,
    highlights: bool,
    summary: bool,
}

/// Thin client for the Exa search and contents endpoints
#[derive(Clone)]
pub struct ExaClient {
    client: Client,
    api_key: Option<String>,
    search_url: String,
    contents_url: String,
}

impl ExaClient {
    pub fn new(settings: &WebSettings, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("open-agent/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            api_key,
            search_url: settings.search_url.clone(),
            contents_url: settings.contents_url.clone(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn post<B: Serialize>(&self, url: &str, body: &B, what: &str) -> Result<Vec<ExaResult>> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Exa API key not configured"))?;

        let response = self.client.post(url).bearer_auth(key).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} API error: {} - {}", what, status.as_u16(), text));
        }

        let parsed: ExaResponse = response.json().await?;
        Ok(parsed.results)
    }

    pub async fn search(&self, query: &str, num_results: u32) -> Result<Vec<ExaResult>> {
        let body = SearchRequest {
            query,
            num_results,
            text: true,
            highlights: true,
            summary: true,
        };
        self.post(&self.search_url, &body, "Search").await
    }

    pub async fn contents(&self, url: &str) -> Result<Vec<ExaResult>> {
        let body = ContentsRequest {
            ids: [url],
            text: true,
            highlights: true,
            summary: true,
        };
        self.post(&self.contents_url, &body, "Content fetch").await
    }
}

// ============================================================================
// Result Processing
// ============================================================================

/// A search hit after filtering and snippet extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_date: Option<String>,
    pub score: f64,
}

/// Drop results whose URL mentions a filtered keyword and cut snippets
pub fn process_results(results: Vec<ExaResult>, filter_keywords: &[String], snippet_chars: usize) -> Vec<SearchHit> {
    results
        .into_iter()
        .filter(|r| {
            let url = r.url.to_lowercase();
            !filter_keywords.iter().any(|k| url.contains(&k.to_lowercase()))
        })
        .map(|r| {
            let text = r.text.unwrap_or_default();
            let snippet = if text.chars().count() > snippet_chars {
                let cut: String = text.chars().take(snippet_chars).collect();
                format!("{}...", cut)
            } else {
                text
            };
            SearchHit {
                title: r.title.unwrap_or_default(),
                url: r.url,
                snippet,
                published_date: r.published_date.filter(|d| !d.is_empty()),
                score: r.score.unwrap_or(0.0),
            }
        })
        .collect()
}

pub fn format_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No search results found.".to_string();
    }

    let mut out = format!("Search Results:\n{}\n\n", "=".repeat(50));
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, hit.title));
        out.push_str(&format!("   URL: {}\n", hit.url));
        out.push_str(&format!("   Snippet: {}\n", hit.snippet));
        if let Some(date) = &hit.published_date {
            out.push_str(&format!("   Published: {}\n", date));
        }
        out.push_str(&format!("   Score: {}\n", hit.score));
        out.push('\n');
    }
    out
}

// ============================================================================
// Tool
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchParams {
    #[schemars(description = "The search query")]
    pub query: String,

    #[schemars(description = "Number of results to return (default 10)")]
    #[serde(default)]
    pub topn: Option<u32>,
}

pub struct WebSearchTool {
    exa: ExaClient,
    settings: WebSettings,
}

impl WebSearchTool {
    pub fn new(exa: ExaClient, settings: WebSettings) -> Self {
        Self { exa, settings }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Search the web for information and return relevant results"
    }

    fn schema(&self) -> Value {
        schema_for::<WebSearchParams>()
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult, ToolExecutionError> {
        let params: WebSearchParams = parse_args(NAME, args)?;
        if !self.exa.is_available() {
            return Ok(ToolResult::failure("Exa API key not configured"));
        }

        let topn = params.topn.unwrap_or(DEFAULT_TOPN).max(1);
        tracing::info!("Web search: {:?} (topn={})", params.query, topn);

        match self.exa.search(&params.query, topn).await {
            Ok(results) => {
                let total = results.len();
                let hits = process_results(results, &self.settings.filter_keywords, self.settings.snippet_chars);
                Ok(ToolResult::text(format_results(&hits)).with_metadata(json!({
                    "query": params.query,
                    "total_results": total,
                    "filtered_results": hits.len(),
                })))
            }
            Err(e) => Ok(ToolResult::failure(format!("Web search failed: {}", e))),
        }
    }
}
