//! Prompt templates for every completion the workflow issues.

use crate::llm::truncate;
use crate::workflow::state::MaterialReference;

/// Digest entries listed before the "more materials" note.
pub const DIGEST_LIMIT: usize = 10;

pub fn planner(query: &str, lang: &str) -> String {
    format!(
        r#"You are a research planner. Create a step-by-step research plan for the following query: {query}

Also decide whether the user wants a podcast script generated as well (for example the query mentions a podcast, a dialogue or a script, or explicitly asks for one).

Respond with JSON only, in this shape:
{{
    "plan": ["step 1", "step 2", ...],
    "generate_podcast": true/false
}}

Write the steps in {lang}."#
    )
}

pub fn outline(query: &str, plan: &[String], lang: &str) -> String {
    let steps: Vec<String> = plan
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect();
    format!(
        r#"Generate a detailed chapter outline for a research report based on the query and research plan below. Chapters should follow a clear logical progression, cover every important aspect of the research, and each have a distinct focus with related keywords.

Research query: {query}
Research plan:
{plan}

Respond with a JSON array only, in this shape:
[
  {{
    "id": "chapter_1",
    "title": "Chapter title",
    "description": "What the chapter covers",
    "priority": 5,
    "keywords": ["keyword 1", "keyword 2"],
    "related_steps": [1, 2, 3]
  }}
]

Requirements:
1. Produce 4-8 chapters
2. Progress from fundamentals to depth
3. Priority runs from 1 (minor) to 5 (essential)
4. Reference research steps by their number
5. Write titles and descriptions in {lang}"#,
        plan = steps.join("\n"),
    )
}

pub fn refinement(step: &str, formatted_results: &str, confidence: f64) -> String {
    format!(
        r#"Generate a more specific search query for this research step, based on an analysis of the search results below.

Research step: {step}
Initial search results: {formatted_results}
Current confidence: {:.2}%

Produce one more specific search query that will surface more detailed or more relevant information. Return only the search query, nothing else."#,
        confidence * 100.0
    )
}

pub fn analysis(
    step: &str,
    allocated: &[MaterialReference],
    formatted_results: &str,
    lang: &str,
) -> String {
    let mut materials = String::new();
    if !allocated.is_empty() {
        materials.push_str("\nMaterials allocated to report chapters:\n");
        for m in allocated {
            materials.push_str(&format!("- {} ({})\n", m.title, truncate(&m.summary, 100)));
        }
    }

    format!(
        r#"You are a researcher. Provide detailed findings and insights for this research step, based on the search results below.

Step under analysis: {step}
Search results:
{formatted_results}
{materials}
Requirements:
1. Give detailed findings and insights
2. Say so explicitly if the search results are insufficient
3. Order the content by importance
4. Relate the analysis to the allocated chapter materials
5. Write in {lang}"#
    )
}

/// Numbered digest of a chapter's materials, capped at [`DIGEST_LIMIT`].
pub fn materials_digest(materials: &[MaterialReference]) -> String {
    let mut out = String::from("## Research materials\n\n");
    for (i, m) in materials.iter().take(DIGEST_LIMIT).enumerate() {
        out.push_str(&format!("### Material [{}]: {}\n", i + 1, m.title));
        out.push_str(&format!(
            "- Source: {} (relevance: {:.2})\n",
            m.source.as_str(),
            m.relevance
        ));
        if !m.url.is_empty() {
            out.push_str(&format!("- Link: {}\n", m.url));
        }
        out.push_str(&format!("- Summary: {}\n\n", m.summary));
    }
    if materials.len() > DIGEST_LIMIT {
        out.push_str(&format!(
            "... and {} more related materials\n",
            materials.len() - DIGEST_LIMIT
        ));
    }
    out
}

pub fn chapter(query: &str, title: &str, description: &str, digest: &str, lang: &str) -> String {
    format!(
        r#"You are a professional report writer.

Research topic: {query}
Chapter title: {title}
Chapter focus: {description}

Write a detailed, professional chapter based on the classified research materials below:

{digest}

Requirements:
1. Base the content strictly on the materials provided; add nothing invented
2. Keep an academic, professional tone
3. Integrate all relevant materials and analyse them in depth
4. Use clean Markdown with a sensible heading hierarchy
5. Progress from fundamentals to depth
6. Cite the supporting material after each important point as [1], [2], ...
7. Stay within 1000-2000 words
8. Write in {lang}

Output the chapter body directly, with no extra commentary."#
    )
}

pub fn key_points(content: &str, lang: &str) -> String {
    format!(
        r#"Extract the 3-5 most important points from the content below. Keep each point short and clear.

Content:
{content}

Reply format:
- point 1
- point 2
- point 3...

Write the points in {lang}. Add no other text."#
    )
}

pub fn report(query: &str, research: &str, image_count: usize, lang: &str) -> String {
    let images = if image_count > 0 {
        format!(
            "\n\nNote: {image_count} related images were collected during research. Where it fits, mark an image position with the placeholder [IMAGE_X:Image title], where X runs from 1 to {image_count}."
        )
    } else {
        String::new()
    };
    format!(
        "You are a senior report writer. Write a comprehensive final report from the research results below, in Markdown.{images} Write the report in {lang}:\n\n{research}\n\nThe original query was: {query}"
    )
}

pub fn podcast(query: &str, research: &str, lang: &str) -> String {
    format!(
        r#"You are a professional podcast producer. Write an engaging podcast dialogue script from the research results below.
The dialogue is between two hosts (Host 1 and Host 2), relaxed, light-hearted and easy to follow.
Discuss the key points of the research in depth and add vivid examples or analogies.

Respond with JSON only, in this shape:
{{
    "title": "Podcast title",
    "lines": [
        {{"speaker": "Host 1", "content": "..."}},
        {{"speaker": "Host 2", "content": "..."}}
    ]
}}

Research results:
{research}

Original query: {query}
Write the script in {lang}."#
    )
}
