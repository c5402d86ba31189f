use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::render::escape_html;
use crate::workflow::parse::strip_fences;
use crate::workflow::prompts;
use crate::workflow::state::RunState;
use crate::workflow::NodeContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodcastScript {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub lines: Vec<PodcastLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodcastLine {
    pub speaker: String,
    pub content: String,
}

/// Visual treatment of one host's lines: class, background, border, text colour.
struct HostStyle {
    class: &'static str,
    background: &'static str,
    border: &'static str,
    text: &'static str,
}

const HOST_1: HostStyle = HostStyle {
    class: "host-1",
    background: "#e6f7ff",
    border: "#1890ff",
    text: "#0050b3",
};

const HOST_2: HostStyle = HostStyle {
    class: "host-2",
    background: "#fff0f6",
    border: "#eb2f96",
    text: "#9e1068",
};

/// Turn the accumulated findings into a two-host dialogue.
///
/// An unparsable script is kept as preformatted text instead of failing.
pub async fn run(ctx: &NodeContext, state: &mut RunState) -> Result<()> {
    let llm = ctx.llm()?;

    let research = state.research_results.join("\n\n");
    let prompt = prompts::podcast(&state.request.query, &research, &ctx.config.report_lang);
    let completion = llm
        .complete(&prompt)
        .await
        .context("podcast completion failed")?;
    let body = strip_fences(&completion, "json");

    match serde_json::from_str::<PodcastScript>(body) {
        Ok(script) => {
            let json = embeddable_json(&script)?;
            info!(title = %script.title, lines = script.lines.len(), "Podcast script generated");
            state.podcast_script = render_transcript(&script, &json);
            state.podcast_json = Some(json);
        }
        Err(e) => {
            warn!("Podcast script is not valid JSON, keeping raw text: {}", e);
            state.podcast_script = format!("<pre>{}</pre>", escape_html(body));
            state.podcast_json = None;
        }
    }
    Ok(())
}

/// Script as JSON with `</div>` escaped so it can sit inside a div.
pub fn embeddable_json(script: &PodcastScript) -> Result<String> {
    let json = serde_json::to_string(script).context("failed to serialise podcast script")?;
    Ok(json.replace("</div>", "<\\/div>"))
}

fn style_for(speaker: &str) -> &'static HostStyle {
    if speaker.to_lowercase().contains('2') {
        &HOST_2
    } else {
        &HOST_1
    }
}

fn render_transcript(script: &PodcastScript, json: &str) -> String {
    let mut html = format!(
        r#"<div class="podcast-container" style="max-width: 800px; margin: 0 auto; font-family: 'Inter', sans-serif;">
    <h2 style="margin: 0 0 20px 0;">{}</h2>
    <div id="podcastJsonData" style="display:none">{}</div>
"#,
        escape_html(&script.title),
        json
    );

    for line in &script.lines {
        let style = style_for(&line.speaker);
        html.push_str(&format!(
            r#"    <div class="podcast-message {}" style="margin-bottom: 20px; padding: 20px; border-radius: 8px; border-left: 5px solid {}; background-color: {}; box-shadow: 0 2px 5px rgba(0,0,0,0.05);">
        <div class="speaker-name" style="font-weight: 700; margin-bottom: 8px; color: {}; text-transform: uppercase; letter-spacing: 0.5px;">{}</div>
        <div class="message-content" style="line-height: 1.6; color: #333; font-size: 16px;">{}</div>
    </div>
"#,
            style.class,
            style.border,
            style.background,
            style.text,
            escape_html(&line.speaker),
            escape_html(&line.content)
        ));
    }

    html.push_str("</div>");
    html
}
