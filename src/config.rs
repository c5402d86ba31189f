use std::path::PathBuf;
use std::str::FromStr;

/// Run settings for one research execution.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// Upper bound on materialised plan steps. A request's own `max_steps` wins.
    pub max_steps: usize,
    /// Append a References section under every chapter.
    pub include_sources: bool,
    /// Collect images into the report (gallery and inline placeholders).
    pub include_images: bool,
    /// Language every writing prompt asks for, BCP 47.
    pub report_lang: String,
    /// Force the podcast stage on regardless of the planner's decision.
    pub generate_podcast: bool,
    /// Hits requested from the external backend per query.
    pub max_results: usize,
    /// Directory backing the internal search backend.
    pub corpus_dir: Option<PathBuf>,
    pub tavily_api_key: Option<String>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            include_sources: true,
            include_images: true,
            report_lang: "en-US".to_string(),
            generate_podcast: false,
            max_results: 5,
            corpus_dir: None,
            tavily_api_key: None,
        }
    }
}

impl ResearchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_steps: env_or("RESEARCH_MAX_STEPS", defaults.max_steps),
            include_sources: env_or("RESEARCH_INCLUDE_SOURCES", defaults.include_sources),
            include_images: env_or("RESEARCH_INCLUDE_IMAGES", defaults.include_images),
            report_lang: dotenv::var("RESEARCH_REPORT_LANG").unwrap_or(defaults.report_lang),
            generate_podcast: env_or("RESEARCH_GENERATE_PODCAST", defaults.generate_podcast),
            max_results: env_or("RESEARCH_MAX_RESULTS", defaults.max_results),
            corpus_dir: dotenv::var("RESEARCH_CORPUS_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            tavily_api_key: dotenv::var("TAVILY_API_KEY").ok().filter(|k| !k.is_empty()),
        }
    }

    /// Effective step cap for a request.
    pub fn step_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(n) if n > 0 => n,
            _ => self.max_steps,
        }
    }
}

/// Read `key` from the environment, falling back to `default` when unset or unparsable.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    dotenv::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
