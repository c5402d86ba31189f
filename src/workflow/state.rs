use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::search::{SearchCoordinator, SearchSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_steps: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_number: usize,
    pub step_query: String,
    /// Formatted search hits as shown to the model.
    pub search_results: String,
    /// Synthesised findings, or the failure text.
    pub analysis: String,
    pub images: Vec<String>,
    pub status: StepStatus,
    pub confidence: f64,
    /// Every query issued for the step, refinement first.
    pub search_queries: Vec<String>,
    pub processing_time: Option<Duration>,
    pub error_message: Option<String>,
}

impl StepResult {
    pub fn pending(step_number: usize, step_query: &str) -> Self {
        Self {
            step_number,
            step_query: step_query.to_string(),
            search_results: String::new(),
            analysis: String::new(),
            images: Vec::new(),
            status: StepStatus::Pending,
            confidence: 0.0,
            search_queries: Vec::new(),
            processing_time: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlineStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterOutline {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 1-5, higher is more important.
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub status: OutlineStatus,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub related_steps: Vec<usize>,
}

fn default_priority() -> u8 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialReference {
    pub id: String,
    /// Assigned by the chapter allocator; `None` while unassigned.
    pub chapter_id: Option<String>,
    pub step_number: usize,
    pub source: SearchSource,
    pub title: String,
    pub url: String,
    pub content: String,
    pub summary: String,
    pub relevance: f64,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Draft,
    Generating,
    Completed,
    Error,
}

/// How much material a chapter has gathered so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    #[default]
    Empty,
    SomeMaterial,
    WellResearched,
}

impl Coverage {
    pub fn for_source_count(count: usize) -> Self {
        if count > 3 {
            Coverage::WellResearched
        } else if count > 0 {
            Coverage::SomeMaterial
        } else {
            Coverage::Empty
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterContent {
    pub chapter_id: String,
    pub title: String,
    pub content: String,
    pub materials: Vec<MaterialReference>,
    pub image_references: Vec<String>,
    pub status: ChapterStatus,
    pub coverage: Coverage,
    pub key_points: Vec<String>,
    pub source_count: usize,
    pub internal_sources: usize,
    pub external_sources: usize,
    pub last_updated: DateTime<Utc>,
}

impl ChapterContent {
    pub fn from_outline(outline: &ChapterOutline) -> Self {
        Self {
            chapter_id: outline.id.clone(),
            title: outline.title.clone(),
            content: String::new(),
            materials: Vec::new(),
            image_references: Vec::new(),
            status: ChapterStatus::Draft,
            coverage: Coverage::Empty,
            key_points: Vec::new(),
            source_count: 0,
            internal_sources: 0,
            external_sources: 0,
            last_updated: Utc::now(),
        }
    }

    /// Count one more source and refresh the coverage tag.
    pub fn record_source(&mut self, source: SearchSource) {
        match source {
            SearchSource::Internal => self.internal_sources += 1,
            SearchSource::External => self.external_sources += 1,
        }
        self.source_count = self.internal_sources + self.external_sources;
        self.coverage = Coverage::for_source_count(self.source_count);
        self.last_updated = Utc::now();
    }
}

/// The single mutable record threaded through every node of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub request: RunRequest,
    pub plan: Vec<String>,
    pub step_results: Vec<StepResult>,
    /// Flat per-step findings, one string per step.
    pub research_results: Vec<String>,
    /// Deduplicated, in collection order.
    pub images: Vec<String>,
    pub chapter_outline: Vec<ChapterOutline>,
    pub chapter_contents: HashMap<String, ChapterContent>,
    pub all_materials: Vec<MaterialReference>,
    #[serde(skip)]
    pub material_registry: HashSet<String>,
    pub markdown_report: String,
    pub final_report: String,
    pub podcast_script: String,
    /// Structured podcast script, `</div>`-escaped for embedding.
    pub podcast_json: Option<String>,
    pub generate_podcast: bool,
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) search: Option<SearchCoordinator>,
}

impl RunState {
    pub fn new(request: RunRequest) -> Self {
        Self {
            request,
            plan: Vec::new(),
            step_results: Vec::new(),
            research_results: Vec::new(),
            images: Vec::new(),
            chapter_outline: Vec::new(),
            chapter_contents: HashMap::new(),
            all_materials: Vec::new(),
            material_registry: HashSet::new(),
            markdown_report: String::new(),
            final_report: String::new(),
            podcast_script: String::new(),
            podcast_json: None,
            generate_podcast: false,
            start_time: None,
            search: None,
        }
    }

    /// Append images not seen before, keeping first-seen order.
    pub fn add_images(&mut self, images: &[String]) {
        for image in images {
            if !self.images.contains(image) {
                self.images.push(image.clone());
            }
        }
    }

    pub fn chapter_preview(&self, chapter_id: &str) -> Option<&ChapterContent> {
        self.chapter_contents.get(chapter_id)
    }

    pub fn chapter_materials(&self, chapter_id: &str) -> &[MaterialReference] {
        self.chapter_contents
            .get(chapter_id)
            .map(|c| c.materials.as_slice())
            .unwrap_or(&[])
    }

    pub fn chapter_description(&self, chapter_id: &str) -> Option<&str> {
        self.chapter_outline
            .iter()
            .find(|c| c.id == chapter_id)
            .map(|c| c.description.as_str())
    }
}
