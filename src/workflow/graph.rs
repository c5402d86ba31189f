//! A small directed-graph executor over the fixed set of workflow nodes.

use std::collections::HashSet;
use std::fmt;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info};

use crate::workflow::state::RunState;
use crate::workflow::{planner, podcast, reporter, researcher, NodeContext};

/// Upper bound on node executions per invocation.
const MAX_HOPS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Planner,
    Researcher,
    Reporter,
    Podcast,
}

impl NodeId {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeId::Planner => "planner",
            NodeId::Researcher => "researcher",
            NodeId::Reporter => "reporter",
            NodeId::Podcast => "podcast",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Node(NodeId),
    End,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Node(node) => node.fmt(f),
            Target::End => f.write_str("end"),
        }
    }
}

/// Chooses the next hop from the state a node left behind.
pub type Router = fn(&RunState) -> Target;

#[derive(Clone)]
enum Edge {
    Always(Target),
    When { route: Router, targets: Vec<Target> },
}

impl Edge {
    fn targets(&self) -> &[Target] {
        match self {
            Edge::Always(target) => std::slice::from_ref(target),
            Edge::When { targets, .. } => targets,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph has no entry point")]
    MissingEntryPoint,
    #[error("entry point {0} is not a registered node")]
    UnknownEntryPoint(NodeId),
    #[error("node {0} is registered twice")]
    DuplicateNode(NodeId),
    #[error("edge leaves unregistered node {0}")]
    UnknownSource(NodeId),
    #[error("node {0} has more than one outgoing edge")]
    DuplicateEdge(NodeId),
    #[error("edge {from} -> {to} points at an unregistered node")]
    DanglingEdge { from: NodeId, to: NodeId },
    #[error("node {0} has no outgoing edge")]
    MissingEdge(NodeId),
    #[error("router after {from} chose undeclared target {to}")]
    UndeclaredTarget { from: NodeId, to: Target },
    #[error("run exceeded {0} node executions")]
    HopLimit(usize),
}

/// Graph under construction. Nothing is validated until [`StateGraph::compile`].
#[derive(Default)]
pub struct StateGraph {
    nodes: Vec<NodeId>,
    edges: Vec<(NodeId, Edge)>,
    entry: Option<NodeId>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeId) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn set_entry_point(&mut self, node: NodeId) -> &mut Self {
        self.entry = Some(node);
        self
    }

    pub fn add_edge(&mut self, from: NodeId, to: Target) -> &mut Self {
        self.edges.push((from, Edge::Always(to)));
        self
    }

    /// `route` must only ever return one of `targets`; this is checked at run time.
    pub fn add_conditional_edge(&mut self, from: NodeId, route: Router, targets: &[Target]) -> &mut Self {
        self.edges.push((
            from,
            Edge::When {
                route,
                targets: targets.to_vec(),
            },
        ));
        self
    }

    /// Check the graph once: one registered entry point, every node with
    /// exactly one outgoing edge, and no edge pointing at an unknown node.
    pub fn compile(&self) -> Result<CompiledGraph, GraphError> {
        let mut registered = HashSet::new();
        for &node in &self.nodes {
            if !registered.insert(node) {
                return Err(GraphError::DuplicateNode(node));
            }
        }

        let entry = self.entry.ok_or(GraphError::MissingEntryPoint)?;
        if !registered.contains(&entry) {
            return Err(GraphError::UnknownEntryPoint(entry));
        }

        let mut with_edge = HashSet::new();
        for (from, edge) in &self.edges {
            if !registered.contains(from) {
                return Err(GraphError::UnknownSource(*from));
            }
            if !with_edge.insert(*from) {
                return Err(GraphError::DuplicateEdge(*from));
            }
            for target in edge.targets() {
                if let Target::Node(to) = target {
                    if !registered.contains(to) {
                        return Err(GraphError::DanglingEdge { from: *from, to: *to });
                    }
                }
            }
        }

        if let Some(&node) = self.nodes.iter().find(|n| !with_edge.contains(n)) {
            return Err(GraphError::MissingEdge(node));
        }

        Ok(CompiledGraph {
            entry,
            edges: self.edges.clone(),
        })
    }
}

/// A validated graph, ready to drive runs.
pub struct CompiledGraph {
    entry: NodeId,
    edges: Vec<(NodeId, Edge)>,
}

impl CompiledGraph {
    /// Run nodes in sequence from the entry point until a route reaches
    /// [`Target::End`]. Stops at the first node error.
    pub async fn invoke(&self, ctx: &NodeContext, state: &mut RunState) -> Result<()> {
        let mut current = self.entry;
        for _ in 0..MAX_HOPS {
            info!(node = %current, "Entering node");
            run_node(current, ctx, state).await?;

            let next = self.next(current, state)?;
            debug!(from = %current, to = %next, "Transition");
            match next {
                Target::Node(node) => current = node,
                Target::End => return Ok(()),
            }
        }
        Err(GraphError::HopLimit(MAX_HOPS).into())
    }

    fn next(&self, from: NodeId, state: &RunState) -> Result<Target, GraphError> {
        let edge = self
            .edges
            .iter()
            .find(|(source, _)| *source == from)
            .map(|(_, edge)| edge)
            .ok_or(GraphError::MissingEdge(from))?;
        match edge {
            Edge::Always(target) => Ok(*target),
            Edge::When { route, targets } => {
                let to = route(state);
                if targets.contains(&to) {
                    Ok(to)
                } else {
                    Err(GraphError::UndeclaredTarget { from, to })
                }
            }
        }
    }
}

async fn run_node(node: NodeId, ctx: &NodeContext, state: &mut RunState) -> Result<()> {
    match node {
        NodeId::Planner => planner::run(ctx, state).await,
        NodeId::Researcher => researcher::run(ctx, state).await,
        NodeId::Reporter => reporter::run(ctx, state).await,
        NodeId::Podcast => podcast::run(ctx, state).await,
    }
}

/// Podcast only when the run asked for one.
pub fn route_after_reporter(state: &RunState) -> Target {
    if state.generate_podcast {
        Target::Node(NodeId::Podcast)
    } else {
        Target::End
    }
}

/// planner → researcher → reporter → {podcast | end}, podcast → end.
pub fn build_research_graph() -> Result<CompiledGraph, GraphError> {
    let mut graph = StateGraph::new();
    graph
        .add_node(NodeId::Planner)
        .add_node(NodeId::Researcher)
        .add_node(NodeId::Reporter)
        .add_node(NodeId::Podcast)
        .set_entry_point(NodeId::Planner)
        .add_edge(NodeId::Planner, Target::Node(NodeId::Researcher))
        .add_edge(NodeId::Researcher, Target::Node(NodeId::Reporter))
        .add_conditional_edge(
            NodeId::Reporter,
            route_after_reporter,
            &[Target::Node(NodeId::Podcast), Target::End],
        )
        .add_edge(NodeId::Podcast, Target::End);
    graph.compile()
}
