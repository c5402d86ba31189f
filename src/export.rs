use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::render::escape_html;
use crate::workflow::RunState;

/// Write the run's artifacts into `dir`: `report.md`, `report.html` and,
/// when a podcast was produced, `podcast.html` and `podcast.json`.
pub async fn write_artifacts(dir: &Path, state: &RunState) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output dir {}", dir.display()))?;

    let mut files = vec![
        ("report.md", state.markdown_report.clone()),
        ("report.html", html_page(&state.request.query, &state.final_report)),
    ];
    if !state.podcast_script.is_empty() {
        files.push((
            "podcast.html",
            html_page(&state.request.query, &state.podcast_script),
        ));
    }
    if let Some(json) = &state.podcast_json {
        files.push(("podcast.json", json.clone()));
    }

    let mut written = Vec::with_capacity(files.len());
    for (name, body) in files {
        let path = dir.join(name);
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Artifact written");
        written.push(path);
    }
    Ok(written)
}

fn html_page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        body
    )
}
