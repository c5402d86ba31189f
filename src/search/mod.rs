pub mod coordinator;
pub mod corpus;
pub mod evaluator;
pub mod tavily;

use std::fmt::Write as _;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use coordinator::SearchCoordinator;

/// Prior relevance assigned to internal hits.
pub const INTERNAL_SCORE: f64 = 0.8;
/// Prior relevance assigned to external hits.
pub const EXTERNAL_SCORE: f64 = 0.6;

/// A search capability. Returns raw text made of
/// `[Result N]` / `Title:` / `URL:` / `Content:` stanzas.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Internal,
    External,
}

impl SearchSource {
    pub fn prior_score(self) -> f64 {
        match self {
            SearchSource::Internal => INTERNAL_SCORE,
            SearchSource::External => EXTERNAL_SCORE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SearchSource::Internal => "internal",
            SearchSource::External => "external",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub source: SearchSource,
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
}

/// The unit of quality evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultCollection {
    pub results: Vec<SearchResult>,
    pub query: String,
    pub is_sufficient: bool,
    pub confidence: f64,
}

impl SearchResultCollection {
    pub fn new(query: &str) -> Self {
        Self {
            results: Vec::new(),
            query: query.to_string(),
            is_sufficient: false,
            confidence: 0.0,
        }
    }

    /// Append another collection's hits and recompute quality.
    pub fn merge(&mut self, other: SearchResultCollection) {
        self.results.extend(other.results);
        evaluator::evaluate(self);
    }

    /// Total content length across all hits, in characters.
    pub fn content_len(&self) -> usize {
        self.results.iter().map(|r| r.content.chars().count()).sum()
    }

    pub fn has_source(&self, source: SearchSource) -> bool {
        self.results.iter().any(|r| r.source == source)
    }

    /// Numbered rendering of the hits plus a quality line, for prompts and traces.
    pub fn format_for_llm(&self) -> String {
        if self.results.is_empty() {
            return String::new();
        }

        let mut out = format!(
            "Search results for '{}' ({} total):\n\n",
            self.query,
            self.results.len()
        );
        for (i, result) in self.results.iter().enumerate() {
            let _ = writeln!(out, "[{}] {}", i + 1, result.title);
            let _ = writeln!(out, "Source: {}", result.source.as_str());
            if !result.url.is_empty() {
                let _ = writeln!(out, "URL: {}", result.url);
            }
            let _ = writeln!(out, "Content: {}\n", result.content);
        }
        let _ = write!(
            out,
            "Search quality: confidence {:.1}%, content {}",
            self.confidence * 100.0,
            if self.is_sufficient { "sufficient" } else { "insufficient" }
        );
        out
    }
}

/// Parse a backend's raw stanza output into discrete hits.
///
/// Blank lines and surrounding whitespace are ignored, `---` separators are
/// skipped, and lines following `Content:` that carry no field prefix are
/// appended to the content. Stanzas without a title are dropped.
pub fn parse_result_blocks(raw: &str, source: SearchSource) -> Vec<SearchResult> {
    let mut results = Vec::new();
    let mut current: Option<SearchResult> = None;
    let mut in_content = false;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line == "---" {
            continue;
        }

        if line.starts_with("[Result") {
            if let Some(done) = current.take().filter(|r| !r.title.is_empty()) {
                results.push(done);
            }
            current = Some(SearchResult {
                source,
                title: String::new(),
                url: String::new(),
                content: String::new(),
                score: source.prior_score(),
            });
            in_content = false;
            continue;
        }

        let Some(result) = current.as_mut() else {
            continue;
        };

        if let Some(title) = line.strip_prefix("Title:") {
            result.title = title.trim().to_string();
            in_content = false;
        } else if let Some(url) = line.strip_prefix("URL:") {
            result.url = url.trim().to_string();
            in_content = false;
        } else if let Some(content) = line.strip_prefix("Content:") {
            result.content = content.trim().to_string();
            in_content = true;
        } else if in_content {
            result.content.push('\n');
            result.content.push_str(line);
        }
    }

    if let Some(done) = current.filter(|r| !r.title.is_empty()) {
        results.push(done);
    }
    results
}

/// Render hits in the stanza format `parse_result_blocks` reads.
pub fn format_result_blocks<'a>(hits: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>) -> String {
    hits.into_iter()
        .enumerate()
        .map(|(i, (title, url, content))| {
            format!(
                "[Result {}]\nTitle: {}\nURL: {}\nContent: {}\n",
                i + 1,
                title,
                url,
                content
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}
