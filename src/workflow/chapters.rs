//! Evidence bookkeeping: turning hits into materials, assigning them to
//! outline chapters, and writing the chapters up.
//!
//! Chapter relevance is a lexical heuristic (keyword and title substring
//! hits), not a classifier.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::llm::Completer;
use crate::search::SearchResultCollection;
use crate::workflow::parse::{parse_bullets, strip_fences};
use crate::workflow::prompts;
use crate::workflow::state::{
    ChapterContent, ChapterOutline, ChapterStatus, MaterialReference, OutlineStatus, RunState,
};

/// Characters of content kept as a material's summary.
const SUMMARY_CHARS: usize = 300;
const KEYWORD_WEIGHT: f64 = 1.0;
const TITLE_WEIGHT: f64 = 0.8;

const GENERIC_KEY_POINT: &str = "Key findings are discussed in this chapter.";
const NO_MATERIAL_BODY: &str = "No research material was available for this chapter.";

/// Stable material id derived from the source URL, or from title and
/// content when the hit has no URL.
pub fn material_id(url: &str, title: &str, content: &str) -> String {
    let hash = if url.is_empty() {
        let mut hasher = blake3::Hasher::new();
        hasher.update(title.as_bytes());
        hasher.update(b"\n");
        hasher.update(content.as_bytes());
        hasher.finalize()
    } else {
        blake3::hash(url.as_bytes())
    };
    format!("material_{}", &hash.to_hex()[..16])
}

pub fn summarize(content: &str) -> String {
    match content.char_indices().nth(SUMMARY_CHARS) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}

/// Convert every not-yet-registered hit into a material. Hits whose id is
/// already in `registry` are skipped.
pub fn to_materials(
    registry: &mut HashSet<String>,
    collection: &SearchResultCollection,
    step_number: usize,
) -> Vec<MaterialReference> {
    let mut materials = Vec::new();
    for result in &collection.results {
        let id = material_id(&result.url, &result.title, &result.content);
        if !registry.insert(id.clone()) {
            debug!(material = %id, "Skipping known material");
            continue;
        }
        materials.push(MaterialReference {
            id,
            chapter_id: None,
            step_number,
            source: result.source,
            title: result.title.clone(),
            url: result.url.clone(),
            content: result.content.clone(),
            summary: summarize(&result.content),
            relevance: 0.0,
            confidence: result.score,
            created_at: Utc::now(),
        });
    }
    materials
}

/// Keyword hits weigh 1.0, a title hit 0.8, normalised by the number of terms.
/// Matching is case-insensitive substring search; blank terms are ignored.
pub fn relevance(text: &str, keywords: &[String], title: &str) -> f64 {
    let text = text.to_lowercase();
    let keywords: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    let title = title.trim();

    let terms = keywords.len() + usize::from(!title.is_empty());
    if terms == 0 {
        return 0.0;
    }

    let keyword_hits = keywords
        .iter()
        .filter(|k| text.contains(&k.to_lowercase()))
        .count() as f64;
    let title_hit = !title.is_empty() && text.contains(&title.to_lowercase());

    let score = keyword_hits * KEYWORD_WEIGHT + if title_hit { TITLE_WEIGHT } else { 0.0 };
    score / terms as f64
}

/// Assign each material to its best-scoring chapter, creating chapter
/// content on first use. Returns the materials that found a chapter.
///
/// The strictly highest score wins, so ties go to the earlier chapter.
/// Materials scoring zero everywhere stay unassigned. Without an outline
/// nothing can be assigned and every material is returned as-is.
pub fn allocate(
    materials: &mut [MaterialReference],
    outline: &mut [ChapterOutline],
    contents: &mut HashMap<String, ChapterContent>,
) -> Vec<MaterialReference> {
    if outline.is_empty() {
        warn!("No chapter outline available, skipping material allocation");
        return materials.to_vec();
    }

    let mut allocated = Vec::new();
    for material in materials.iter_mut() {
        let mut best: Option<(usize, f64)> = None;
        for (i, chapter) in outline.iter().enumerate() {
            let score = relevance(&material.summary, &chapter.keywords, &chapter.title);
            if score > best.map_or(0.0, |(_, s)| s) {
                best = Some((i, score));
            }
        }

        let Some((index, score)) = best else {
            debug!(material = %material.id, "No chapter matched material");
            continue;
        };

        let chapter = &mut outline[index];
        material.chapter_id = Some(chapter.id.clone());
        material.relevance = score.clamp(0.0, 1.0);

        let content = contents.entry(chapter.id.clone()).or_insert_with(|| {
            debug!(chapter = %chapter.id, "Chapter content created");
            ChapterContent::from_outline(chapter)
        });
        if chapter.status == OutlineStatus::Pending {
            chapter.status = OutlineStatus::InProgress;
        }
        content.materials.push(material.clone());
        allocated.push(material.clone());
    }
    allocated
}

/// Count freshly allocated sources per chapter and touch the chapters
/// the outline relates to this step.
pub fn update_progress(state: &mut RunState, step_number: usize, allocated: &[MaterialReference]) {
    for material in allocated {
        let Some(chapter_id) = material.chapter_id.as_deref() else {
            continue;
        };
        if let Some(content) = state.chapter_contents.get_mut(chapter_id) {
            content.record_source(material.source);
        }
    }

    let now = Utc::now();
    for chapter in &state.chapter_outline {
        if chapter.related_steps.contains(&step_number) {
            if let Some(content) = state.chapter_contents.get_mut(&chapter.id) {
                content.last_updated = now;
            }
        }
    }
}

/// Write every chapter whose body is still empty, in outline order.
///
/// A failing chapter gets an error placeholder; the others are unaffected.
pub async fn write_chapters(llm: &dyn Completer, state: &mut RunState, lang: &str) {
    info!(chapters = state.chapter_contents.len(), "Starting chapter content generation");
    let query = state.request.query.clone();

    for chapter in state.chapter_outline.iter_mut() {
        let Some(content) = state.chapter_contents.get_mut(&chapter.id) else {
            continue;
        };
        if !content.content.is_empty() {
            continue;
        }
        content.status = ChapterStatus::Generating;

        if content.materials.is_empty() {
            content.content = NO_MATERIAL_BODY.to_string();
            content.status = ChapterStatus::Completed;
            chapter.status = OutlineStatus::Completed;
            continue;
        }

        info!(chapter = %chapter.title, materials = content.materials.len(), "Writing chapter");
        let digest = prompts::materials_digest(&content.materials);
        let prompt = prompts::chapter(&query, &chapter.title, &chapter.description, &digest, lang);

        match llm.complete(&prompt).await {
            Ok(completion) => {
                content.content = strip_fences(&completion, "markdown").to_string();
                content.status = ChapterStatus::Completed;
                content.key_points = extract_key_points(llm, &content.content, lang).await;
                chapter.status = OutlineStatus::Completed;
            }
            Err(e) => {
                warn!(chapter = %chapter.id, "Chapter generation failed: {:#}", e);
                content.content = format!("Content generation failed: {:#}", e);
                content.status = ChapterStatus::Error;
            }
        }
        content.last_updated = Utc::now();
    }
    info!("Chapter content generation completed");
}

/// 3-5 bullet points for a chapter, or one generic point when the model
/// fails or returns no bullets.
pub async fn extract_key_points(llm: &dyn Completer, content: &str, lang: &str) -> Vec<String> {
    let points = match llm.complete(&prompts::key_points(content, lang)).await {
        Ok(reply) => parse_bullets(&reply),
        Err(e) => {
            warn!("Key point extraction failed: {:#}", e);
            Vec::new()
        }
    };
    if points.is_empty() {
        return vec![GENERIC_KEY_POINT.to_string()];
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchResult, SearchSource};
    use crate::testing::ScriptedCompleter;
    use crate::workflow::state::{Coverage, RunRequest};

    fn chapter(id: &str, title: &str, keywords: &[&str], related: &[usize]) -> ChapterOutline {
        ChapterOutline {
            id: id.to_string(),
            title: title.to_string(),
            description: format!("{} description", title),
            priority: 3,
            status: OutlineStatus::Pending,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            related_steps: related.to_vec(),
        }
    }

    fn hit(source: SearchSource, title: &str, url: &str, content: &str) -> SearchResult {
        SearchResult {
            source,
            title: title.to_string(),
            url: url.to_string(),
            content: content.to_string(),
            score: source.prior_score(),
        }
    }

    fn collection(hits: Vec<SearchResult>) -> SearchResultCollection {
        let mut c = SearchResultCollection::new("q");
        c.results = hits;
        c
    }

    #[test]
    fn test_material_id_is_stable_and_url_based() {
        let a = material_id("https://ex.org/a", "A", "one");
        let b = material_id("https://ex.org/a", "B", "two");
        assert_eq!(a, b);
        assert!(a.starts_with("material_"));
        assert_eq!(a.len(), "material_".len() + 16);
        assert_ne!(material_id("", "A", "one"), material_id("", "A", "two"));
    }

    #[test]
    fn test_summarize_cuts_at_300_chars() {
        let long = "é".repeat(301);
        let summary = summarize(&long);
        assert_eq!(summary.chars().count(), 303);
        assert!(summary.ends_with("..."));
        assert_eq!(summarize("short"), "short");
        assert_eq!(summarize(&"x".repeat(300)), "x".repeat(300));
    }

    #[test]
    fn test_ingestion_is_idempotent() {
        let mut registry = HashSet::new();
        let c = collection(vec![
            hit(SearchSource::Internal, "A", "https://ex.org/a", "alpha"),
            hit(SearchSource::External, "A again", "https://ex.org/a", "alpha"),
            hit(SearchSource::External, "B", "https://ex.org/b", "beta"),
        ]);
        let first = to_materials(&mut registry, &c, 1);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].source, SearchSource::Internal);
        assert_eq!(first[1].confidence, 0.6);

        let second = to_materials(&mut registry, &c, 2);
        assert!(second.is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_relevance_weights() {
        let keywords = vec!["remote".to_string(), "Productivity".to_string()];
        let score = relevance("Remote productivity in Hybrid Teams", &keywords, "hybrid teams");
        assert!((score - (2.0 + 0.8) / 3.0).abs() < 1e-9);

        let score = relevance("remote only", &keywords, "Hybrid");
        assert!((score - 1.0 / 3.0).abs() < 1e-9);

        assert_eq!(relevance("anything", &[], ""), 0.0);
        assert_eq!(relevance("nothing matches", &keywords, "Title"), 0.0);
    }

    #[test]
    fn test_allocate_picks_best_and_creates_content() {
        let mut outline = vec![
            chapter("c1", "Background", &["history"], &[]),
            chapter("c2", "Productivity", &["output", "remote"], &[]),
        ];
        let mut contents = HashMap::new();
        let mut registry = HashSet::new();
        let c = collection(vec![
            hit(SearchSource::External, "Study", "https://a", "Remote output rose"),
            hit(SearchSource::External, "Other", "https://b", "unrelated text"),
        ]);
        let mut materials = to_materials(&mut registry, &c, 1);

        let allocated = allocate(&mut materials, &mut outline, &mut contents);
        assert_eq!(allocated.len(), 1);
        assert_eq!(allocated[0].chapter_id.as_deref(), Some("c2"));
        assert_eq!(materials[0].chapter_id.as_deref(), Some("c2"));
        assert!(materials[1].chapter_id.is_none());
        assert_eq!(contents.len(), 1);
        assert_eq!(contents["c2"].materials.len(), 1);
        assert_eq!(contents["c2"].status, ChapterStatus::Draft);
        assert_eq!(outline[1].status, OutlineStatus::InProgress);
        assert_eq!(outline[0].status, OutlineStatus::Pending);
    }

    #[test]
    fn test_allocate_ties_go_to_first_chapter() {
        let mut outline = vec![
            chapter("c1", "First", &["remote"], &[]),
            chapter("c2", "Second", &["remote"], &[]),
        ];
        for _ in 0..3 {
            let mut contents = HashMap::new();
            let mut registry = HashSet::new();
            let c = collection(vec![hit(SearchSource::Internal, "T", "https://a", "remote work")]);
            let mut materials = to_materials(&mut registry, &c, 1);
            let allocated = allocate(&mut materials, &mut outline, &mut contents);
            assert_eq!(allocated[0].chapter_id.as_deref(), Some("c1"));
        }
    }

    #[test]
    fn test_allocate_without_outline_returns_everything_unassigned() {
        let mut contents = HashMap::new();
        let mut registry = HashSet::new();
        let c = collection(vec![hit(SearchSource::Internal, "T", "https://a", "x")]);
        let mut materials = to_materials(&mut registry, &c, 1);
        let allocated = allocate(&mut materials, &mut [], &mut contents);
        assert_eq!(allocated.len(), 1);
        assert!(allocated[0].chapter_id.is_none());
        assert!(contents.is_empty());
    }

    #[test]
    fn test_update_progress_counts_sources() {
        let mut state = RunState::new(RunRequest::new("q"));
        state.chapter_outline = vec![chapter("c1", "Remote", &["remote"], &[1])];
        let c = collection(vec![
            hit(SearchSource::Internal, "A", "https://a", "remote a"),
            hit(SearchSource::External, "B", "https://b", "remote b"),
        ]);
        let mut materials = to_materials(&mut state.material_registry, &c, 1);
        let allocated = allocate(&mut materials, &mut state.chapter_outline, &mut state.chapter_contents);
        update_progress(&mut state, 1, &allocated);

        let content = &state.chapter_contents["c1"];
        assert_eq!(content.internal_sources, 1);
        assert_eq!(content.external_sources, 1);
        assert_eq!(content.source_count, 2);
        assert_eq!(content.coverage, Coverage::SomeMaterial);
        assert_eq!(state.chapter_materials("c1").len(), 2);
    }

    #[tokio::test]
    async fn test_write_chapters_isolates_failures() {
        let mut state = RunState::new(RunRequest::new("remote work"));
        state.chapter_outline = vec![
            chapter("c1", "Alpha", &["alpha"], &[]),
            chapter("c2", "Beta", &["beta"], &[]),
        ];
        let c = collection(vec![
            hit(SearchSource::Internal, "A", "https://a", "alpha text"),
            hit(SearchSource::Internal, "B", "https://b", "beta text"),
        ]);
        let mut materials = to_materials(&mut state.material_registry, &c, 1);
        allocate(&mut materials, &mut state.chapter_outline, &mut state.chapter_contents);

        let llm = ScriptedCompleter::new()
            .fail_when(&["professional report writer", "Chapter title: Beta"], "model overloaded")
            .on("professional report writer", "```markdown\nAlpha body [1]\n```")
            .on("most important points", "- one\n- two\n- three");

        write_chapters(&llm, &mut state, "en-US").await;

        let alpha = &state.chapter_contents["c1"];
        assert_eq!(alpha.status, ChapterStatus::Completed);
        assert_eq!(alpha.content, "Alpha body [1]");
        assert_eq!(alpha.key_points, vec!["one", "two", "three"]);
        assert_eq!(state.chapter_outline[0].status, OutlineStatus::Completed);

        let beta = &state.chapter_contents["c2"];
        assert_eq!(beta.status, ChapterStatus::Error);
        assert!(beta.content.contains("model overloaded"));
        assert!(beta.key_points.is_empty());
        assert_eq!(state.chapter_outline[1].status, OutlineStatus::InProgress);
    }

    #[tokio::test]
    async fn test_key_points_fallback() {
        let llm = ScriptedCompleter::new().default_reply("no bullets here");
        assert_eq!(extract_key_points(&llm, "body", "en-US").await, vec![GENERIC_KEY_POINT]);

        let llm = ScriptedCompleter::new().on_fail("most important points", "down");
        assert_eq!(extract_key_points(&llm, "body", "en-US").await, vec![GENERIC_KEY_POINT]);
    }
}
