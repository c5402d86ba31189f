pub mod chapters;
pub mod graph;
pub mod parse;
pub mod planner;
pub mod podcast;
pub mod prompts;
pub mod reporter;
pub mod researcher;
pub mod state;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::ResearchConfig;
use crate::llm::Completer;
use crate::progress::ProgressReporter;
use crate::search::{SearchBackend, SearchCoordinator};

pub use graph::{build_research_graph, CompiledGraph, GraphError, NodeId, StateGraph, Target};
pub use state::{RunRequest, RunState};

/// Collaborators shared by every node of one run.
#[derive(Clone)]
pub struct NodeContext {
    llm: Arc<dyn Completer>,
    internal: Arc<dyn SearchBackend>,
    external: Arc<dyn SearchBackend>,
    pub progress: ProgressReporter,
    pub config: Arc<ResearchConfig>,
}

impl NodeContext {
    pub fn new(
        llm: Arc<dyn Completer>,
        internal: Arc<dyn SearchBackend>,
        external: Arc<dyn SearchBackend>,
        progress: ProgressReporter,
        config: Arc<ResearchConfig>,
    ) -> Self {
        Self {
            llm,
            internal,
            external,
            progress,
            config,
        }
    }

    /// The completion capability, checked at node entry. Unavailability is run-fatal.
    pub fn llm(&self) -> Result<&dyn Completer> {
        self.llm
            .ensure_available()
            .context("text generation capability unavailable")?;
        Ok(self.llm.as_ref())
    }

    pub fn search_coordinator(&self) -> SearchCoordinator {
        SearchCoordinator::new(self.internal.clone(), self.external.clone())
    }
}
