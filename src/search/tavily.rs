use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{format_result_blocks, SearchBackend};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Debug, Deserialize)]
struct TavilyHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// External web search over the Tavily API.
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: Option<String>,
    max_results: usize,
    endpoint: String,
}

impl TavilySearch {
    pub fn new(api_key: Option<String>, max_results: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_key,
            max_results,
            endpoint: TAVILY_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SearchBackend for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("TAVILY_API_KEY not set"))?;

        let body = serde_json::json!({
            "api_key": api_key,
            "query": query,
            "max_results": self.max_results,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .context("search request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("failed to read search response")?;
        if !status.is_success() {
            bail!("search API returned status {}: {}", status.as_u16(), text);
        }

        let parsed: TavilyResponse =
            serde_json::from_str(&text).context("failed to parse search response")?;
        debug!(query, results = parsed.results.len(), "Tavily search");

        Ok(format_result_blocks(
            parsed
                .results
                .iter()
                .map(|h| (h.title.as_str(), h.url.as_str(), h.content.as_str())),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{parse_result_blocks, SearchSource};

    #[tokio::test]
    async fn test_missing_key_is_an_error() {
        let tavily = TavilySearch::new(None, 5).unwrap();
        let err = tavily.search("anything").await.unwrap_err();
        assert_eq!(err.to_string(), "TAVILY_API_KEY not set");
    }

    #[test]
    fn test_response_shape_formats_into_blocks() {
        let json = r#"{"results":[{"title":"Remote work study","url":"https://ex.org/a","content":"Findings...","score":0.91},{"title":"Second","url":"https://ex.org/b"}]}"#;
        let parsed: TavilyResponse = serde_json::from_str(json).unwrap();
        let raw = format_result_blocks(
            parsed
                .results
                .iter()
                .map(|h| (h.title.as_str(), h.url.as_str(), h.content.as_str())),
        );
        let hits = parse_result_blocks(&raw, SearchSource::External);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Remote work study");
        assert_eq!(hits[1].content, "");
    }
}
