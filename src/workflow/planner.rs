use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::llm::truncate;
use crate::progress::MessageKind;
use crate::workflow::parse::parse_plan;
use crate::workflow::prompts;
use crate::workflow::state::RunState;
use crate::workflow::NodeContext;

/// Produce the research plan and the podcast decision.
pub async fn run(ctx: &NodeContext, state: &mut RunState) -> Result<()> {
    ctx.progress.emit(MessageKind::PlannerStart, json!(""));
    let llm = ctx.llm()?;

    let prompt = prompts::planner(&state.request.query, &ctx.config.report_lang);
    let completion = llm
        .complete(&prompt)
        .await
        .context("planner completion failed")?;
    debug!(response = truncate(&completion, 500), "Planner response");

    let parsed = parse_plan(&completion, &state.request.query);
    let mut plan = parsed.plan;
    let limit = ctx.config.step_limit(state.request.max_steps);
    if plan.len() > limit {
        warn!(steps = plan.len(), limit, "Plan exceeds step limit, truncating");
        plan.truncate(limit);
    }

    state.plan = plan;
    state.generate_podcast = parsed.generate_podcast || ctx.config.generate_podcast;
    info!(
        steps = state.plan.len(),
        podcast = state.generate_podcast,
        "Research plan ready"
    );

    ctx.progress.emit(MessageKind::PlannerEnd, json!(state.plan));
    Ok(())
}
