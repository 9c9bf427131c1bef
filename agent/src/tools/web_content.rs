//! Web content tool: fetch the full text of one URL through Exa

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::web_search::{ExaClient, ExaResult};
use super::{parse_args, schema_for, Tool};
use crate::conversation::{Arguments, ToolResult};
use crate::error::ToolExecutionError;

const NAME: &str = "web_content";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebContentParams {
    #[schemars(description = "The URL to fetch content from")]
    pub url: String,
}

/// Title/URL header, a rule, then the page text
pub fn format_content(result: &ExaResult) -> String {
    let mut out = format!(
        "Title: {}\nURL: {}\n",
        result.title.as_deref().unwrap_or_default(),
        result.url
    );
    if let Some(date) = result.published_date.as_deref().filter(|d| !d.is_empty()) {
        out.push_str(&format!("Published: {}\n", date));
    }
    out.push_str(&format!("\n{}\n\n", "=".repeat(50)));
    out.push_str(result.text.as_deref().unwrap_or_default());
    out
}

pub struct WebContentTool {
    exa: ExaClient,
}

impl WebContentTool {
    pub fn new(exa: ExaClient) -> Self {
        Self { exa }
    }
}

#[async_trait]
impl Tool for WebContentTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Fetch full content from a specific URL"
    }

    fn schema(&self) -> Value {
        schema_for::<WebContentParams>()
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult, ToolExecutionError> {
        let params: WebContentParams = parse_args(NAME, args)?;
        if url::Url::parse(&params.url).is_err() {
            return Err(ToolExecutionError::invalid(NAME, format!("not a valid URL: {}", params.url)));
        }
        if !self.exa.is_available() {
            return Ok(ToolResult::failure("Exa API key not configured"));
        }

        tracing::info!("Fetching content: {}", params.url);
        let results = match self.exa.contents(&params.url).await {
            Ok(results) => results,
            Err(e) => return Ok(ToolResult::failure(format!("Content fetch failed: {}", e))),
        };

        let Some(first) = results.first() else {
            return Ok(ToolResult::failure("No content found for the provided URL"));
        };

        let content = format_content(first);
        Ok(ToolResult::text(content.clone()).with_metadata(json!({
            "url": params.url,
            "content_length": content.len(),
            "title": first.title.clone().unwrap_or_default(),
        })))
    }
}
