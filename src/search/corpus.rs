use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{format_result_blocks, SearchBackend};

/// Content-addressed document ID (blake3 hex hash).
pub type DocId = String;

const TEXT_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Chars of context kept on each side of a keyword hit.
const CONTEXT_WINDOW: usize = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocMeta {
    pub id: DocId,
    pub name: String,
    pub path: PathBuf,
    pub size: usize,
}

/// A search result excerpt from a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocExcerpt {
    pub doc_id: DocId,
    pub offset: usize,
    pub content: String,
    pub match_count: usize,
}

struct Document {
    meta: DocMeta,
    text: String,
}

/// Internal search backend over a directory of text documents.
pub struct LocalCorpus {
    docs: Vec<Document>,
    max_results: usize,
}

impl LocalCorpus {
    /// Load every text document below `dir`. Duplicate contents are stored once.
    pub async fn load(dir: &Path, max_results: usize) -> Result<Self> {
        let mut docs = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current)
                .await
                .with_context(|| format!("Failed to read corpus dir {}", current.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let is_text = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| TEXT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false);
                if !is_text {
                    continue;
                }
                let bytes = match tokio::fs::read(&path).await {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("Skipping unreadable document {}: {}", path.display(), e);
                        continue;
                    }
                };
                let id = blake3::hash(&bytes).to_hex().to_string();
                if !seen.insert(id.clone()) {
                    continue;
                }
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("untitled")
                    .to_string();
                debug!(doc_id = %id, name, size = bytes.len(), "document loaded");
                docs.push(Document {
                    meta: DocMeta {
                        id,
                        name,
                        path,
                        size: bytes.len(),
                    },
                    text: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }
        }

        docs.sort_by(|a, b| a.meta.path.cmp(&b.meta.path));
        info!(dir = %dir.display(), doc_count = docs.len(), "Corpus loaded");
        Ok(Self { docs, max_results })
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocMeta> {
        self.docs.iter().map(|d| &d.meta)
    }

    /// Keyword search across all documents. Splits the query into words and
    /// matches ANY word; excerpts containing more distinct keywords rank first.
    pub fn search_excerpts(&self, query: &str) -> Vec<(&DocMeta, DocExcerpt)> {
        let keywords: Vec<String> = query
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.chars().count() >= 2)
            .collect();
        if keywords.is_empty() {
            return vec![];
        }

        let mut results = Vec::new();
        for doc in &self.docs {
            for excerpt in search_document(&doc.meta.id, &doc.text, &keywords, self.max_results) {
                results.push((&doc.meta, excerpt));
            }
        }

        // Stable sort keeps document order among equal matches.
        results.sort_by(|a, b| b.1.match_count.cmp(&a.1.match_count));
        results.truncate(self.max_results);
        results
    }
}

/// Excerpts around keyword hits in one document, at most `max_results`.
fn search_document(
    doc_id: &str,
    text: &str,
    keywords: &[String],
    max_results: usize,
) -> Vec<DocExcerpt> {
    let chars: Vec<char> = text.chars().collect();
    let text_lower = text.to_lowercase();
    let mut results = Vec::new();
    let mut seen_offsets: Vec<usize> = Vec::new();

    for keyword in keywords {
        let mut search_from = 0;
        while results.len() < max_results {
            let Some(byte_pos) = text_lower[search_from..].find(keyword.as_str()) else {
                break;
            };
            let abs_byte_pos = search_from + byte_pos;
            let char_pos = text_lower[..abs_byte_pos].chars().count();

            // Skip if we already have a match near this offset
            let nearby = seen_offsets
                .iter()
                .any(|&o| char_pos.abs_diff(o) < CONTEXT_WINDOW);
            if !nearby && char_pos < chars.len() {
                seen_offsets.push(char_pos);
                let start = char_pos.saturating_sub(CONTEXT_WINDOW);
                let end = (char_pos + keyword.chars().count() + CONTEXT_WINDOW).min(chars.len());
                let excerpt: String = chars[start..end].iter().collect();

                let excerpt_lower = excerpt.to_lowercase();
                let match_count = keywords
                    .iter()
                    .filter(|k| excerpt_lower.contains(k.as_str()))
                    .count();

                results.push(DocExcerpt {
                    doc_id: doc_id.to_string(),
                    offset: char_pos,
                    content: excerpt.split_whitespace().collect::<Vec<_>>().join(" "),
                    match_count,
                });
            }

            search_from = abs_byte_pos + keyword.len().max(1);
            if search_from >= text_lower.len() {
                break;
            }
        }
    }

    results
}

#[async_trait]
impl SearchBackend for LocalCorpus {
    fn name(&self) -> &str {
        "local-corpus"
    }

    async fn search(&self, query: &str) -> Result<String> {
        let hits = self.search_excerpts(query);
        debug!(query, results = hits.len(), "Corpus search");
        let urls: Vec<String> = hits
            .iter()
            .map(|(meta, ex)| format!("file://{}#{}", meta.path.display(), ex.offset))
            .collect();
        Ok(format_result_blocks(
            hits.iter()
                .zip(urls.iter())
                .map(|((meta, ex), url)| (meta.name.as_str(), url.as_str(), ex.content.as_str())),
        ))
    }
}
