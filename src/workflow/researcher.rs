use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::llm::{truncate, Completer};
use crate::progress::MessageKind;
use crate::search::{SearchCoordinator, SearchResultCollection};
use crate::workflow::chapters;
use crate::workflow::parse::parse_outline;
use crate::workflow::prompts;
use crate::workflow::state::{RunState, StepResult, StepStatus};
use crate::workflow::NodeContext;

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp"];

static IMAGE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://[^\s]+\.(?:jpg|jpeg|png|gif|svg|webp)").unwrap()
});

/// Execute the plan one step at a time.
///
/// A failing step is recorded as failed and the loop moves on; only an
/// unavailable completion capability aborts the node.
pub async fn run(ctx: &NodeContext, state: &mut RunState) -> Result<()> {
    let llm = ctx.llm()?;

    if state.start_time.is_none() {
        state.start_time = Some(Utc::now());
        state.material_registry.clear();
        state.chapter_contents.clear();
    }
    let search = state
        .search
        .get_or_insert_with(|| ctx.search_coordinator())
        .clone();

    if state.chapter_outline.is_empty() {
        if let Err(e) = generate_outline(llm, state, &ctx.config.report_lang).await {
            warn!("Failed to generate chapter outline: {:#}", e);
        }
    }

    if state.step_results.len() != state.plan.len() {
        state.step_results = state
            .plan
            .iter()
            .enumerate()
            .map(|(i, step)| StepResult::pending(i + 1, step))
            .collect();
    }

    info!(steps = state.plan.len(), "Starting research");
    let plan = state.plan.clone();
    let mut findings = Vec::with_capacity(plan.len());
    for (index, step) in plan.iter().enumerate() {
        findings.push(research_step(ctx, llm, &search, state, index, step).await);
    }
    state.research_results = findings;

    let failed = state
        .step_results
        .iter()
        .filter(|r| r.status == StepStatus::Failed)
        .count();
    info!(
        steps = plan.len(),
        failed,
        materials = state.all_materials.len(),
        images = state.images.len(),
        "Research finished"
    );
    Ok(())
}

async fn generate_outline(llm: &dyn Completer, state: &mut RunState, lang: &str) -> Result<()> {
    if state.plan.is_empty() {
        return Err(anyhow!("no research plan available"));
    }
    let prompt = prompts::outline(&state.request.query, &state.plan, lang);
    let completion = llm
        .complete(&prompt)
        .await
        .context("outline completion failed")?;
    let outline = parse_outline(&completion).context("failed to parse chapter outline")?;

    info!(chapters = outline.len(), "Chapter outline generated");
    for chapter in &outline {
        debug!(id = %chapter.id, title = %chapter.title, priority = chapter.priority, "chapter");
    }
    state.chapter_outline = outline;
    Ok(())
}

/// Run one step and record its outcome in `state.step_results[index]`.
/// Returns the step's flat findings text.
async fn research_step(
    ctx: &NodeContext,
    llm: &dyn Completer,
    search: &SearchCoordinator,
    state: &mut RunState,
    index: usize,
    step: &str,
) -> String {
    let started = Instant::now();
    let step_number = index + 1;
    state.step_results[index].status = StepStatus::InProgress;

    info!(step = step_number, query = step, "Research step started");
    ctx.progress.emit(
        MessageKind::ResearcherStart,
        json!({"step": step_number, "query": step}),
    );
    ctx.progress
        .emit(MessageKind::ResearcherStepStart, json!({"query": step}));

    let mut collection = match search.search(step, true).await {
        Ok(collection) => collection,
        Err(e) => {
            warn!(step = step_number, "Search failed: {:#}", e);
            let text = format!("Step: {}\nFindings: search failed: {:#}", step, e);
            let result = &mut state.step_results[index];
            result.status = StepStatus::Failed;
            result.error_message = Some(format!("{:#}", e));
            result.analysis = text.clone();
            result.search_queries = vec![step.to_string()];
            result.processing_time = Some(started.elapsed());
            ctx.progress.emit(
                MessageKind::ResearcherStepEnd,
                json!({"query": step, "total": 0, "error": format!("{:#}", e)}),
            );
            ctx.progress.emit(
                MessageKind::ResearcherEnd,
                json!({"step": step_number, "status": result.status}),
            );
            return text;
        }
    };
    ctx.progress.emit(
        MessageKind::ResearcherStepEnd,
        json!({"query": step, "total": collection.results.len(), "hits": collection.results}),
    );

    // One refinement pass at most.
    let mut queries = Vec::with_capacity(2);
    let mut notes = Vec::new();
    if !collection.is_sufficient {
        match refine(llm, step, &collection).await {
            Ok(Some(refined)) => {
                info!(step = step_number, refined = %refined, "Refining search");
                queries.push(refined.clone());
                match search.search(&refined, false).await {
                    Ok(extra) => collection.merge(extra),
                    Err(e) => {
                        warn!(step = step_number, "Refined search failed: {:#}", e);
                        notes.push(format!("refined search failed: {:#}", e));
                    }
                }
            }
            Ok(None) => debug!(step = step_number, "Empty refinement query, keeping initial results"),
            Err(e) => {
                warn!(step = step_number, "Refinement failed: {:#}", e);
                notes.push(format!("refinement failed: {:#}", e));
            }
        }
    }
    queries.push(step.to_string());

    let mut materials = chapters::to_materials(&mut state.material_registry, &collection, step_number);
    let allocated = chapters::allocate(
        &mut materials,
        &mut state.chapter_outline,
        &mut state.chapter_contents,
    );
    state.all_materials.extend(materials);

    let images = if ctx.config.include_images {
        extract_image_urls(&collection)
    } else {
        Vec::new()
    };
    state.add_images(&images);

    let formatted = collection.format_for_llm();
    let prompt = prompts::analysis(step, &allocated, &formatted, &ctx.config.report_lang);
    let (text, status) = match llm.complete(&prompt).await {
        Ok(completion) => {
            debug!(step = step_number, response = truncate(&completion, 300), "Step analysis");
            (
                format!("Step: {}\nFindings: {}", step, completion.trim()),
                StepStatus::Completed,
            )
        }
        Err(e) => {
            warn!(step = step_number, "Analysis failed: {:#}", e);
            notes.insert(0, format!("{:#}", e));
            (
                format!(
                    "Step: {}\nFindings: analysis failed: {:#}\n\nSearch results: {}",
                    step, e, formatted
                ),
                StepStatus::Failed,
            )
        }
    };

    let result = &mut state.step_results[index];
    result.status = status;
    result.analysis = text.clone();
    result.search_results = formatted;
    result.search_queries = queries;
    result.confidence = collection.confidence;
    result.images = images;
    result.processing_time = Some(started.elapsed());
    result.error_message = (!notes.is_empty()).then(|| notes.join("; "));

    info!(
        step = step_number,
        status = ?status,
        results = collection.results.len(),
        confidence = collection.confidence,
        allocated = allocated.len(),
        "Research step finished"
    );

    chapters::update_progress(state, step_number, &allocated);
    ctx.progress.emit(
        MessageKind::ResearcherEnd,
        json!({"step": step_number, "status": status}),
    );
    text
}

/// Ask for a more specific query. `None` when the model returns nothing usable.
async fn refine(
    llm: &dyn Completer,
    step: &str,
    collection: &SearchResultCollection,
) -> Result<Option<String>> {
    let prompt = prompts::refinement(step, &collection.format_for_llm(), collection.confidence);
    let reply = llm.complete(&prompt).await?;
    let refined = reply.trim();
    Ok((!refined.is_empty()).then(|| refined.to_string()))
}

/// Image URLs among the hits, result by result: the result URL when its
/// path has an image extension, then bare image URLs in its content.
/// Deduplicated, first occurrence wins.
pub fn extract_image_urls(collection: &SearchResultCollection) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        if !images.iter().any(|i| i == candidate) {
            images.push(candidate.to_string());
        }
    };

    for result in &collection.results {
        if let Ok(parsed) = url::Url::parse(&result.url) {
            let path = parsed.path().to_lowercase();
            if IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
                push(&result.url);
            }
        }
        for m in IMAGE_URL_RE.find_iter(&result.content) {
            push(m.as_str());
        }
    }
    images
}
