use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::ResearchConfig;
use crate::llm::Completer;
use crate::progress::{MessageKind, ProgressReporter, ProgressSink};
use crate::search::SearchBackend;
use crate::workflow::state::StepStatus;
use crate::workflow::{build_research_graph, NodeContext, RunRequest, RunState};

/// Name the Markdown report is published under.
pub const REPORT_TITLE: &str = "Research-Report.md";

/// Sort order of the reasoning detail among a reply's details.
const REASONING_ORDER: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailKind {
    Think,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingDetail {
    pub order: u32,
    pub kind: DetailKind,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub details: Vec<ProcessingDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Owns the run state for the duration of a run and writes whatever it holds
/// into the reply when finished or dropped, so the reply is finalised on
/// success, error, panic and cancellation alike.
struct ReplyFinalizer<'a> {
    reply: &'a mut ChatMessage,
    state: Option<RunState>,
    payload: Option<serde_json::Value>,
}

impl<'a> ReplyFinalizer<'a> {
    fn new(reply: &'a mut ChatMessage) -> Self {
        Self {
            reply,
            state: None,
            payload: None,
        }
    }

    /// Write the reply from the held state and hand the state back.
    fn finish(&mut self) -> Option<RunState> {
        let state = self.state.take()?;
        if state.markdown_report.is_empty() {
            warn!(reply = %self.reply.id, "Empty reply for research run");
        } else {
            self.reply.message = state.markdown_report.clone();
        }
        let reasoning = reasoning_trace(&state);
        if !reasoning.is_empty() {
            self.reply.details.push(ProcessingDetail {
                order: REASONING_ORDER,
                kind: DetailKind::Think,
                description: reasoning,
            });
        }
        if let Some(payload) = self.payload.take() {
            self.reply.payload = Some(payload);
        }
        Some(state)
    }
}

impl Drop for ReplyFinalizer<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Entry point tying the collaborators to a workflow run.
pub struct ResearchEngine {
    llm: Arc<dyn Completer>,
    internal: Arc<dyn SearchBackend>,
    external: Arc<dyn SearchBackend>,
}

impl ResearchEngine {
    pub fn new(
        llm: Arc<dyn Completer>,
        internal: Arc<dyn SearchBackend>,
        external: Arc<dyn SearchBackend>,
    ) -> Self {
        Self {
            llm,
            internal,
            external,
        }
    }

    /// Research `query` end to end and return the final state.
    ///
    /// `reply` receives the report text and a reasoning trace however the
    /// run ends. A run-fatal error is returned after that finalisation.
    pub async fn run(
        &self,
        query: &str,
        config: &ResearchConfig,
        request: &ChatMessage,
        reply: &mut ChatMessage,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RunState> {
        self.run_request(RunRequest::new(query), config, request, reply, sink)
            .await
    }

    /// Like [`ResearchEngine::run`], for a request carrying its own step cap.
    pub async fn run_request(
        &self,
        run_request: RunRequest,
        config: &ResearchConfig,
        request: &ChatMessage,
        reply: &mut ChatMessage,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RunState> {
        let mut finalizer = ReplyFinalizer::new(reply);

        info!(request = %request.id, query = %run_request.query, "Starting deep research");
        let progress = ProgressReporter::new(sink);
        let ctx = NodeContext::new(
            self.llm.clone(),
            self.internal.clone(),
            self.external.clone(),
            progress.clone(),
            Arc::new(config.clone()),
        );

        let graph = build_research_graph().context("failed to build research graph")?;
        let state = finalizer.state.insert(RunState::new(run_request));
        if let Err(e) = graph.invoke(&ctx, state).await {
            error!(request = %request.id, "Research run failed: {:#}", e);
            return Err(e.context("research workflow failed"));
        }

        let report = json!({
            "title": REPORT_TITLE,
            "markdown_len": state.markdown_report.len(),
            "html_len": state.final_report.len(),
            "chapters": state.chapter_outline.len(),
            "images": state.images.len(),
            "podcast": !state.podcast_script.is_empty(),
        });
        info!(
            markdown_len = state.markdown_report.len(),
            html_len = state.final_report.len(),
            chapters = state.chapter_outline.len(),
            chapter_contents = state.chapter_contents.len(),
            "Research report ready"
        );
        progress.emit(MessageKind::ReporterEnd, report.clone());
        finalizer.payload = Some(report);

        finalizer
            .finish()
            .ok_or_else(|| anyhow!("run state already finalised"))
    }
}

/// Plan and per-step outcomes, as far as the run got.
fn reasoning_trace(state: &RunState) -> String {
    if state.plan.is_empty() {
        return String::new();
    }
    let mut out = String::from("Research plan:\n");
    for (i, step) in state.plan.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
    }
    for result in &state.step_results {
        let status = match result.status {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        };
        out.push_str(&format!(
            "\nStep {} [{}], confidence {:.2}, queries: {}",
            result.step_number,
            status,
            result.confidence,
            result.search_queries.join(" | ")
        ));
        if let Some(err) = &result.error_message {
            out.push_str(&format!(", error: {}", err));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{block, RecordingSink, ScriptedBackend, ScriptedCompleter};

    fn engine(llm: ScriptedCompleter) -> ResearchEngine {
        ResearchEngine::new(
            Arc::new(llm),
            Arc::new(ScriptedBackend::new("internal").reply(block("A", "https://a", "text"))),
            Arc::new(ScriptedBackend::new("external")),
        )
    }

    #[tokio::test]
    async fn test_run_finalises_reply_and_reports_end() {
        let llm = ScriptedCompleter::new()
            .on("research planner", r#"{"plan": ["one", "two"], "generate_podcast": false}"#)
            .on("senior report writer", "# Final")
            .default_reply("findings");
        let sink = Arc::new(RecordingSink::new());
        let request = ChatMessage::new("req-1", "remote work");
        let mut reply = ChatMessage::new("reply-1", "");

        let state = engine(llm)
            .run("remote work", &ResearchConfig::default(), &request, &mut reply, sink.clone())
            .await
            .unwrap();

        assert_eq!(reply.message, "# Final");
        assert_eq!(reply.details.len(), 1);
        assert_eq!(reply.details[0].kind, DetailKind::Think);
        assert_eq!(reply.details[0].order, 50);
        assert!(reply.details[0].description.contains("1. one\n2. two"));
        let payload = reply.payload.as_ref().unwrap();
        assert_eq!(payload["title"], REPORT_TITLE);
        assert_eq!(state.step_results.len(), 2);

        let events = sink.events();
        let last = events.last().unwrap();
        assert_eq!(last.kind, MessageKind::ReporterEnd);
        assert_eq!(&last.payload, payload);
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[tokio::test]
    async fn test_failed_run_still_finalises_partial_reply() {
        let llm = ScriptedCompleter::new()
            .on("research planner", r#"{"plan": ["only"]}"#)
            .on_fail("senior report writer", "backend gone")
            .default_reply("findings");
        let mut reply = ChatMessage::new("reply-1", "");

        let err = engine(llm)
            .run(
                "q",
                &ResearchConfig::default(),
                &ChatMessage::new("req", "q"),
                &mut reply,
                Arc::new(RecordingSink::new()),
            )
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("backend gone"));
        assert!(reply.message.is_empty());
        assert!(reply.payload.is_none());
        assert!(reply.details[0].description.contains("Step 1 [completed]"));
    }

    #[tokio::test]
    async fn test_progress_failures_never_abort() {
        let llm = ScriptedCompleter::new()
            .on("research planner", r#"{"plan": ["one"]}"#)
            .on("senior report writer", "# Final")
            .default_reply("findings");
        let sink = Arc::new(RecordingSink::failing());
        let mut reply = ChatMessage::default();

        engine(llm)
            .run("q", &ResearchConfig::default(), &ChatMessage::default(), &mut reply, sink.clone())
            .await
            .unwrap();
        assert_eq!(reply.message, "# Final");
        assert!(!sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_llm_is_fatal_but_finalised() {
        let mut reply = ChatMessage::new("reply", "");
        let result = engine(ScriptedCompleter::new().unavailable())
            .run(
                "q",
                &ResearchConfig::default(),
                &ChatMessage::default(),
                &mut reply,
                Arc::new(RecordingSink::new()),
            )
            .await;
        assert!(result.is_err());
        assert!(reply.message.is_empty());
        assert!(reply.details.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_finalises_partial_reply() {
        let llm = ScriptedCompleter::new()
            .on("research planner", r#"{"plan": ["one", "two"]}"#)
            .stall_on("senior report writer")
            .default_reply("findings");
        let mut reply = ChatMessage::new("reply", "");

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            engine(llm).run(
                "q",
                &ResearchConfig::default(),
                &ChatMessage::default(),
                &mut reply,
                Arc::new(RecordingSink::new()),
            ),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(reply.details.len(), 1);
        let trace = &reply.details[0].description;
        assert!(trace.contains("1. one\n2. two"));
        assert!(trace.contains("Step 1 [completed]"));
        assert!(trace.contains("Step 2 [completed]"));
        assert!(reply.payload.is_none());
    }

    #[test]
    fn test_finalizer_runs_on_panic() {
        let mut reply = ChatMessage::default();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut finalizer = ReplyFinalizer::new(&mut reply);
            let state = finalizer.state.insert(RunState::new(RunRequest::new("q")));
            state.plan = vec!["look around".to_string()];
            state.markdown_report = "partial".to_string();
            finalizer.payload = Some(json!({"k": 1}));
            panic!("node blew up");
        }));
        assert!(outcome.is_err());
        assert_eq!(reply.message, "partial");
        assert!(reply.details[0].description.contains("1. look around"));
        assert_eq!(reply.payload, Some(json!({"k": 1})));
    }
}
