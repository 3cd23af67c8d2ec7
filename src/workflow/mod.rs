//! Workflow engine
//!
//! ClientProfiling → PortfolioConstruction → StockResearch → PortfolioRefinement → Terminal
//!
//! Exactly one node is active at a time. A node reads the state and returns a
//! message plus the next state; the engine checks the transition against the
//! fixed routing table, appends the message and moves on.

use crate::config::Settings;
use crate::context::HistoryMode;
use crate::error::PipelineError;
use crate::llm::{OpenAiClient, ReasoningService};
use crate::models::{ClientProfile, Message, Portfolio};
use crate::state::WorkflowState;
use crate::tools::{ToolSource, ToolSourceResolver};
use crate::validation::OutputSchema;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod node;
pub mod prompts;

pub use node::{AnalystNode, ToolAccess};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeId {
    ClientProfiling,
    PortfolioConstruction,
    StockResearch,
    PortfolioRefinement,
    Terminal,
}

impl NodeId {
    pub const ENTRY: NodeId = NodeId::ClientProfiling;

    pub const ALL: [NodeId; 5] = [
        NodeId::ClientProfiling,
        NodeId::PortfolioConstruction,
        NodeId::StockResearch,
        NodeId::PortfolioRefinement,
        NodeId::Terminal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::ClientProfiling => "ClientProfiling",
            NodeId::PortfolioConstruction => "PortfolioConstruction",
            NodeId::StockResearch => "StockResearch",
            NodeId::PortfolioRefinement => "PortfolioRefinement",
            NodeId::Terminal => "Terminal",
        }
    }

    /// Message author for the node running this state.
    pub fn agent_name(&self) -> Option<&'static str> {
        match self {
            NodeId::ClientProfiling => Some("client_profile_agent"),
            NodeId::PortfolioConstruction => Some("portfolio_constructor_agent"),
            NodeId::StockResearch => Some("stock_research_agent"),
            NodeId::PortfolioRefinement => Some("portfolio_refine_agent"),
            NodeId::Terminal => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == NodeId::Terminal
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeId {
    type Err = PipelineError;

    /// Accepts state names and agent names; `END` means Terminal.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        if name == "END" {
            return Ok(NodeId::Terminal);
        }
        NodeId::ALL
            .into_iter()
            .find(|id| id.as_str() == name || id.agent_name() == Some(name))
            .ok_or_else(|| {
                PipelineError::WorkflowConfiguration(format!("unknown workflow state: {:?}", s))
            })
    }
}

/// The fixed, linear routing table.
pub struct RoutingTable;

impl RoutingTable {
    const ROUTES: [(NodeId, NodeId); 4] = [
        (NodeId::ClientProfiling, NodeId::PortfolioConstruction),
        (NodeId::PortfolioConstruction, NodeId::StockResearch),
        (NodeId::StockResearch, NodeId::PortfolioRefinement),
        (NodeId::PortfolioRefinement, NodeId::Terminal),
    ];

    pub fn successor(from: NodeId) -> Option<NodeId> {
        Self::ROUTES
            .iter()
            .find(|(source, _)| *source == from)
            .map(|(_, target)| *target)
    }

    pub fn allows(from: NodeId, to: NodeId) -> bool {
        Self::successor(from) == Some(to)
    }

    pub fn check(from: NodeId, to: NodeId) -> Result<()> {
        if Self::allows(from, to) {
            Ok(())
        } else {
            Err(PipelineError::WorkflowConfiguration(format!(
                "transition {} -> {} is not in the routing table",
                from, to
            )))
        }
    }
}

/// What a node hands back to the engine.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub message: Message,
    pub next: NodeId,
    pub trace: Vec<String>,
    pub tool_source: Option<ToolSource>,
}

/// A step of the workflow. Reads the state, never mutates it.
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    fn id(&self) -> NodeId;
    async fn run(&self, state: &WorkflowState) -> Result<NodeOutcome>;
}

/// Result of a run that reached Terminal.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub messages: Vec<Message>,
    pub visited: Vec<NodeId>,
    pub reasoning_trace: Vec<String>,
    pub tool_source: Option<ToolSource>,
    pub elapsed_ms: u64,
}

impl WorkflowRun {
    /// The canonical result of the run.
    pub fn final_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn final_portfolio(&self) -> Result<Portfolio> {
        let message = self.final_message().ok_or_else(|| {
            PipelineError::WorkflowConfiguration("run produced no messages".to_string())
        })?;
        Ok(serde_json::from_str(&message.content)?)
    }
}

#[derive(Default)]
pub struct WorkflowBuilder {
    nodes: HashMap<NodeId, Arc<dyn WorkflowNode>>,
    duplicates: Vec<NodeId>,
}

impl WorkflowBuilder {
    pub fn node(mut self, node: Arc<dyn WorkflowNode>) -> Self {
        let id = node.id();
        if self.nodes.insert(id, node).is_some() {
            self.duplicates.push(id);
        }
        self
    }

    /// Every non-terminal state must have exactly one node; Terminal has none.
    pub fn build(self) -> Result<Workflow> {
        if let Some(id) = self.duplicates.first() {
            return Err(PipelineError::WorkflowConfiguration(format!(
                "more than one node registered for {}",
                id
            )));
        }
        if self.nodes.contains_key(&NodeId::Terminal) {
            return Err(PipelineError::WorkflowConfiguration(
                "Terminal cannot have a node".to_string(),
            ));
        }
        let missing: Vec<&str> = NodeId::ALL
            .iter()
            .filter(|id| !id.is_terminal() && !self.nodes.contains_key(*id))
            .map(NodeId::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::WorkflowConfiguration(format!(
                "no node for state(s): {}",
                missing.join(", ")
            )));
        }

        Ok(Workflow { nodes: self.nodes })
    }
}

/// Sequential workflow engine. Shareable across independent runs.
pub struct Workflow {
    nodes: HashMap<NodeId, Arc<dyn WorkflowNode>>,
}

impl Workflow {
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::default()
    }

    pub async fn run(&self, profile: ClientProfile) -> Result<WorkflowRun> {
        self.run_until(profile, std::future::pending()).await
    }

    /// Run to Terminal, aborting with `Cancelled` if `cancel` completes first.
    /// Nothing from the active node is committed on cancellation.
    pub async fn run_until<F>(&self, profile: ClientProfile, cancel: F) -> Result<WorkflowRun>
    where
        F: Future<Output = ()> + Send,
    {
        let run_id = Uuid::new_v4();
        let start_time = Instant::now();
        let mut state = WorkflowState::new(profile);
        let mut current = NodeId::ENTRY;
        let mut visited = Vec::new();
        let mut reasoning_trace = Vec::new();
        let mut tool_source = None;

        tokio::pin!(cancel);

        info!(
            %run_id,
            risk_tolerance = state.client_profile().risk_tolerance(),
            "Workflow: starting run"
        );
        reasoning_trace.push("INPUT: Client profile received".to_string());

        loop {
            visited.push(current);
            if current.is_terminal() {
                break;
            }

            let node = self.nodes.get(&current).ok_or_else(|| {
                PipelineError::WorkflowConfiguration(format!("no node for state {}", current))
            })?;

            reasoning_trace.push(format!("ENTER: {}", current));
            debug!(%run_id, node = %current, messages = state.messages().len(), "Entering node");

            let result = tokio::select! {
                biased;
                _ = &mut cancel => {
                    warn!(%run_id, node = %current, "Workflow: run cancelled");
                    return Err(PipelineError::Cancelled { node: current });
                }
                result = node.run(&state) => result,
            };
            let outcome = result.map_err(|e| PipelineError::NodeFailed {
                node: current,
                source: Box::new(e),
            })?;

            RoutingTable::check(current, outcome.next).map_err(|e| PipelineError::NodeFailed {
                node: current,
                source: Box::new(e),
            })?;

            if outcome.tool_source.is_some() {
                tool_source = outcome.tool_source;
            }
            reasoning_trace.extend(outcome.trace);
            reasoning_trace.push(format!("EXIT: {} -> {}", current, outcome.next));
            state.append(outcome.message);
            current = outcome.next;
        }

        let elapsed_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);
        reasoning_trace.push("COMPLETE: Terminal reached".to_string());

        info!(
            %run_id,
            messages = state.messages().len(),
            elapsed_ms,
            "Workflow: run complete"
        );

        Ok(WorkflowRun {
            run_id,
            messages: state.into_messages(),
            visited,
            reasoning_trace,
            tool_source,
            elapsed_ms,
        })
    }
}

/// The four analyst nodes wired in their fixed order.
pub fn build_default_workflow(
    settings: &Settings,
    reasoner: Arc<dyn ReasoningService>,
    resolver: Arc<ToolSourceResolver>,
) -> Result<Workflow> {
    let profiling = AnalystNode::new(
        NodeId::ClientProfiling,
        prompts::CLIENT_PROFILE_PROMPT,
        OutputSchema::ClientSummary,
        HistoryMode::Latest,
        reasoner.clone(),
        settings,
    )?;
    let construction = AnalystNode::new(
        NodeId::PortfolioConstruction,
        prompts::PORTFOLIO_CONSTRUCTION_PROMPT,
        OutputSchema::Portfolio,
        HistoryMode::Latest,
        reasoner.clone(),
        settings,
    )?;
    let research = AnalystNode::new(
        NodeId::StockResearch,
        prompts::STOCK_RESEARCH_PROMPT,
        OutputSchema::StockReport,
        HistoryMode::Full,
        reasoner.clone(),
        settings,
    )?
    .with_tools(resolver);
    let refinement = AnalystNode::new(
        NodeId::PortfolioRefinement,
        prompts::refinement_prompt(),
        OutputSchema::Portfolio,
        HistoryMode::Full,
        reasoner,
        settings,
    )?;

    Workflow::builder()
        .node(Arc::new(profiling))
        .node(Arc::new(construction))
        .node(Arc::new(research))
        .node(Arc::new(refinement))
        .build()
}

/// Default workflow over OpenAI and the configured tool source.
pub fn workflow_from_settings(settings: &Settings) -> Result<Workflow> {
    let reasoner = Arc::new(OpenAiClient::from_settings(settings)?);
    let resolver = Arc::new(ToolSourceResolver::from_settings(settings)?);
    build_default_workflow(settings, reasoner, resolver)
}
