pub mod config;
pub mod export;
pub mod llm;
pub mod progress;
pub mod render;
pub mod run;
pub mod search;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use config::ResearchConfig;
pub use run::{ChatMessage, ResearchEngine};
pub use workflow::{RunRequest, RunState};
