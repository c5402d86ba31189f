use serde::Deserialize;

use crate::workflow::state::ChapterOutline;

/// Query keywords that signal the user wants a podcast.
const PODCAST_KEYWORDS: &[&str] = &["podcast", "播客"];

#[derive(Debug, Default, PartialEq, Deserialize)]
pub struct PlanOutput {
    #[serde(default)]
    pub plan: Vec<String>,
    #[serde(default)]
    pub generate_podcast: bool,
}

/// Strip a leading ```` ```tag ```` or bare ```` ``` ```` fence and a trailing fence.
pub fn strip_fences<'a>(text: &'a str, tag: &str) -> &'a str {
    let mut body = text.trim();
    let tagged = format!("```{}", tag);
    if let Some(rest) = body.strip_prefix(tagged.as_str()) {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// Parse the planner's reply.
///
/// Falls back to one step per non-empty line that does not open or close a
/// JSON object when the reply is not valid JSON; the podcast flag is then
/// inferred from the query.
pub fn parse_plan(completion: &str, query: &str) -> PlanOutput {
    let body = strip_fences(completion, "json");

    match serde_json::from_str::<PlanOutput>(body) {
        Ok(mut parsed) => {
            parsed.plan = parsed
                .plan
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            parsed
        }
        Err(_) => {
            let plan = body
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('{') && !l.starts_with('}'))
                .map(str::to_string)
                .collect();
            PlanOutput {
                plan,
                generate_podcast: wants_podcast(query),
            }
        }
    }
}

pub fn wants_podcast(query: &str) -> bool {
    let lower = query.to_lowercase();
    PODCAST_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub fn parse_outline(completion: &str) -> serde_json::Result<Vec<ChapterOutline>> {
    serde_json::from_str(strip_fences(completion, "json"))
}

/// Lines starting with `-`, without the marker.
pub fn parse_bullets(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|l| l.trim().strip_prefix('-'))
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
