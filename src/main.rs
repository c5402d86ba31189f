use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use deep_research::export::write_artifacts;
use deep_research::llm::LlmClient;
use deep_research::progress::LogSink;
use deep_research::search::corpus::LocalCorpus;
use deep_research::search::tavily::TavilySearch;
use deep_research::search::SearchBackend;
use deep_research::{ChatMessage, ResearchConfig, ResearchEngine, RunRequest};

#[derive(Parser, Debug)]
#[command(name = "deep-research", version, about = "Multi-step research reports from a single query")]
struct Args {
    /// The research question
    query: String,

    /// Cap on research plan steps
    #[arg(long)]
    max_steps: Option<usize>,

    /// Always produce a podcast script
    #[arg(long)]
    podcast: bool,

    /// Leave per-chapter References sections out
    #[arg(long)]
    no_sources: bool,

    /// Directory of .md/.txt documents for internal search
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Where to write report and podcast artifacts
    #[arg(long, default_value = "./research-output")]
    out: PathBuf,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Internal backend used when no corpus directory is configured.
struct EmptyCorpus;

#[async_trait]
impl SearchBackend for EmptyCorpus {
    fn name(&self) -> &str {
        "empty-corpus"
    }

    async fn search(&self, _query: &str) -> Result<String> {
        Ok(String::new())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = ResearchConfig::from_env();
    if args.podcast {
        config.generate_podcast = true;
    }
    if args.no_sources {
        config.include_sources = false;
    }
    if args.corpus.is_some() {
        config.corpus_dir = args.corpus.clone();
    }

    let llm = Arc::new(LlmClient::from_env()?);
    info!(model = llm.model(), "LLM client initialized");

    let internal: Arc<dyn SearchBackend> = match &config.corpus_dir {
        Some(dir) => Arc::new(LocalCorpus::load(dir, config.max_results).await?),
        None => {
            warn!("No corpus directory configured, internal search returns nothing");
            Arc::new(EmptyCorpus)
        }
    };

    let mut tavily = TavilySearch::new(config.tavily_api_key.clone(), config.max_results)?;
    if let Ok(endpoint) = dotenv::var("TAVILY_ENDPOINT") {
        tavily = tavily.with_endpoint(endpoint);
    }
    if config.tavily_api_key.is_none() {
        warn!("TAVILY_API_KEY not set, external search will fail");
    }

    let engine = ResearchEngine::new(llm, internal, Arc::new(tavily));
    let request = ChatMessage::new("cli", args.query.clone());
    let mut reply = ChatMessage::new("cli-reply", "");

    let run_request = RunRequest {
        query: args.query.clone(),
        max_steps: args.max_steps,
    };
    let state = engine
        .run_request(run_request, &config, &request, &mut reply, Arc::new(LogSink))
        .await?;

    let written = write_artifacts(&args.out, &state).await?;
    println!("{}", reply.message);
    info!(files = written.len(), dir = %args.out.display(), "Artifacts exported");
    Ok(())
}
