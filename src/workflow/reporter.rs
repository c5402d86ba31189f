use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::json;
use tracing::{info, warn};

use crate::config::ResearchConfig;
use crate::llm::Completer;
use crate::progress::MessageKind;
use crate::render::markdown_to_html;
use crate::workflow::chapters;
use crate::workflow::parse::strip_fences;
use crate::workflow::prompts;
use crate::workflow::state::RunState;
use crate::workflow::NodeContext;

/// `[IMAGE_n:Title]`, ASCII or full-width colon.
static IMAGE_PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[IMAGE_(\d+)[：:]([^\]]+)\]").unwrap());

const SUMMARY_BOILERPLATE: &str =
    "This report examines the topic systematically across the chapters below.";

/// Compile the final report, chapter-structured when an outline with
/// material exists, otherwise as one free-form document.
pub async fn run(ctx: &NodeContext, state: &mut RunState) -> Result<()> {
    ctx.progress.emit(MessageKind::ReporterStart, json!(""));
    let llm = ctx.llm()?;

    if !state.chapter_outline.is_empty() && !state.chapter_contents.is_empty() {
        info!(chapters = state.chapter_outline.len(), "Compiling chapter-based report");
        chapters::write_chapters(llm, state, &ctx.config.report_lang).await;
        state.markdown_report = assemble_chapter_report(state, &ctx.config);
    } else {
        info!("No chapter structure, compiling traditional report");
        state.markdown_report = traditional_report(llm, state, &ctx.config).await?;
    }

    state.final_report = markdown_to_html(&state.markdown_report);
    if state.markdown_report.is_empty() {
        warn!("Markdown report is empty");
    }
    info!(
        markdown_len = state.markdown_report.len(),
        html_len = state.final_report.len(),
        "Report compiled"
    );
    Ok(())
}

async fn traditional_report(
    llm: &dyn Completer,
    state: &RunState,
    config: &ResearchConfig,
) -> Result<String> {
    let research = state.research_results.join("\n\n");
    let image_count = if config.include_images { state.images.len() } else { 0 };
    let prompt = prompts::report(&state.request.query, &research, image_count, &config.report_lang);

    let completion = llm
        .complete(&prompt)
        .await
        .context("report completion failed")?;
    let markdown = strip_fences(&completion, "markdown");
    Ok(substitute_image_placeholders(markdown, &state.images))
}

pub fn image_tag(url: &str, alt: &str) -> String {
    format!(
        r#"<img src="{}" alt="{}" style="max-width: 90%; display: block; margin: 10px auto;" />"#,
        url, alt
    )
}

/// Replace `[IMAGE_n:Title]` with the n-th image (1-based). Placeholders
/// pointing outside `images` stay as written.
pub fn substitute_image_placeholders(text: &str, images: &[String]) -> String {
    IMAGE_PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures| {
            let index = caps[1].parse::<usize>().ok().filter(|&i| i >= 1);
            match index.and_then(|i| images.get(i - 1)) {
                Some(url) => image_tag(url, caps[2].trim()),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Lowercased title with spaces as dashes.
fn anchor(title: &str) -> String {
    title.to_lowercase().replace(' ', "-")
}

fn assemble_chapter_report(state: &RunState, config: &ResearchConfig) -> String {
    let chapters: Vec<_> = state
        .chapter_outline
        .iter()
        .filter_map(|outline| {
            state
                .chapter_contents
                .get(&outline.id)
                .filter(|c| !c.content.is_empty())
                .map(|c| (outline, c))
        })
        .collect();

    let mut out = format!("# {}\n\n", state.request.query);

    out.push_str("## Summary\n\n");
    let key_points: Vec<&String> = chapters.iter().flat_map(|(_, c)| &c.key_points).collect();
    if key_points.is_empty() {
        out.push_str(SUMMARY_BOILERPLATE);
        out.push_str("\n\n");
    } else {
        for point in key_points {
            out.push_str(&format!("- {}\n", point));
        }
        out.push('\n');
    }

    out.push_str("## Table of Contents\n\n");
    for (i, (outline, _)) in chapters.iter().enumerate() {
        out.push_str(&format!("{}. [{}](#{})\n", i + 1, outline.title, anchor(&outline.title)));
    }
    out.push_str("\n---\n\n");

    for (outline, content) in &chapters {
        out.push_str(&format!("## {} {{#{}}}\n\n", outline.title, anchor(&outline.title)));
        out.push_str(&content.content);
        out.push_str("\n\n");

        if config.include_sources && !content.materials.is_empty() {
            out.push_str("### References\n\n");
            for (j, material) in content.materials.iter().enumerate() {
                if material.url.is_empty() {
                    out.push_str(&format!("[{}] {}\n", j + 1, material.title));
                } else {
                    out.push_str(&format!("[{}] [{}]({})\n", j + 1, material.title, material.url));
                }
            }
            out.push('\n');
        }
    }

    if config.include_images && !state.images.is_empty() {
        out.push_str("## Related Images\n\n");
        for (i, url) in state.images.iter().enumerate() {
            out.push_str(&image_tag(url, &format!("Image {}", i + 1)));
            out.push_str("\n\n");
        }
    }
    out
}
