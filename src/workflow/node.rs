//! Analyst node
//!
//! One parametrised node type drives all four roles: render context, resolve
//! tools (research only), then alternate reasoning calls with tool rounds until
//! a structured output passes validation or the retry budget runs out.

use crate::config::Settings;
use crate::context::{ContextAccumulator, HistoryMode};
use crate::error::PipelineError;
use crate::llm::{ReasoningRequest, ReasoningResponse, ReasoningService, Turn};
use crate::models::Message;
use crate::state::WorkflowState;
use crate::tools::{ToolRegistry, ToolSourceResolver};
use crate::validation::{OutputSchema, StructuredOutputValidator, ValidationPolicy};
use crate::workflow::{NodeId, NodeOutcome, RoutingTable, WorkflowNode};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tools a node may hand to its reasoning step.
pub enum ToolAccess {
    None,
    /// Resolved once per invocation, before the first reasoning call.
    Resolver(Arc<ToolSourceResolver>),
}

pub struct AnalystNode {
    id: NodeId,
    author: &'static str,
    system_prompt: String,
    schema: OutputSchema,
    accumulator: ContextAccumulator,
    tools: ToolAccess,
    next: NodeId,
    reasoner: Arc<dyn ReasoningService>,
    validator: StructuredOutputValidator,
    max_schema_retries: u32,
    max_tool_rounds: u32,
    llm_timeout: Duration,
}

impl AnalystNode {
    /// Node for a non-terminal state, routed to that state's successor.
    pub fn new(
        id: NodeId,
        system_prompt: impl Into<String>,
        schema: OutputSchema,
        history: HistoryMode,
        reasoner: Arc<dyn ReasoningService>,
        settings: &Settings,
    ) -> Result<Self> {
        let author = id.agent_name().ok_or_else(|| {
            PipelineError::WorkflowConfiguration(format!("{} cannot have a node", id))
        })?;
        let next = RoutingTable::successor(id).ok_or_else(|| {
            PipelineError::WorkflowConfiguration(format!("{} has no successor", id))
        })?;

        Ok(Self {
            id,
            author,
            system_prompt: system_prompt.into(),
            schema,
            accumulator: ContextAccumulator::new(history),
            tools: ToolAccess::None,
            next,
            reasoner,
            validator: StructuredOutputValidator::new(ValidationPolicy {
                allocation_tolerance: settings.allocation_tolerance,
                ..ValidationPolicy::default()
            }),
            max_schema_retries: settings.max_schema_retries,
            max_tool_rounds: settings.max_tool_rounds,
            llm_timeout: settings.llm_timeout,
        })
    }

    pub fn with_tools(mut self, resolver: Arc<ToolSourceResolver>) -> Self {
        self.tools = ToolAccess::Resolver(resolver);
        self
    }

    /// Override the next state. The engine still checks it against the routing table.
    pub fn with_next(mut self, next: NodeId) -> Self {
        self.next = next;
        self
    }

    async fn reason(&self, request: &ReasoningRequest) -> Result<ReasoningResponse> {
        match tokio::time::timeout(self.llm_timeout, self.reasoner.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout {
                operation: format!("reasoning call for {}", self.id),
                seconds: self.llm_timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl WorkflowNode for AnalystNode {
    fn id(&self) -> NodeId {
        self.id
    }

    async fn run(&self, state: &WorkflowState) -> Result<NodeOutcome> {
        let context = self.accumulator.render(state);
        let mut trace = Vec::new();

        info!(
            node = %self.id,
            author = self.author,
            schema = self.schema.name(),
            history = ?self.accumulator.mode(),
            fingerprint = %context.fingerprint,
            "Node invoked"
        );
        trace.push(format!(
            "CONTEXT: {} rendered ({} bytes, sha256 {})",
            self.id,
            context.text.len(),
            context.fingerprint
        ));

        let registry: Option<ToolRegistry> = match &self.tools {
            ToolAccess::None => None,
            ToolAccess::Resolver(resolver) => Some(resolver.resolve().await),
        };
        let tool_source = registry.as_ref().map(ToolRegistry::source);
        if let Some(source) = tool_source {
            trace.push(format!("TOOLS: {} using {} tool set", self.id, source));
        }

        let mut request = ReasoningRequest {
            role: self.author.to_string(),
            system_prompt: self.system_prompt.clone(),
            context: context.text,
            schema: self.schema,
            tools: registry
                .as_ref()
                .map(ToolRegistry::descriptors)
                .unwrap_or_default(),
            transcript: Vec::new(),
        };

        let mut tool_rounds = 0u32;
        let mut retries = 0u32;

        loop {
            match self.reason(&request).await? {
                ReasoningResponse::ToolCalls(calls) => {
                    let Some(registry) = registry.as_ref() else {
                        return Err(PipelineError::LlmError(format!(
                            "{} requested tools but has none",
                            self.author
                        )));
                    };

                    tool_rounds += 1;
                    if tool_rounds > self.max_tool_rounds {
                        return Err(PipelineError::LlmError(format!(
                            "{} exceeded {} tool rounds",
                            self.author, self.max_tool_rounds
                        )));
                    }

                    debug!(node = %self.id, round = tool_rounds, calls = calls.len(), "Tool round");
                    request.transcript.push(Turn::ToolRequests(calls.clone()));

                    for call in calls {
                        let content = registry.dispatch(&call).await;
                        trace.push(format!(
                            "TOOL: {} called {} ({} bytes)",
                            self.id,
                            call.name,
                            content.len()
                        ));
                        request.transcript.push(Turn::ToolResult {
                            call_id: call.id,
                            name: call.name,
                            content,
                        });
                    }
                }
                ReasoningResponse::Structured(raw) => {
                    match self.validator.validate(self.schema, &raw) {
                        Ok(output) => {
                            trace.push(format!(
                                "VALIDATED: {} produced {}",
                                self.id,
                                output.schema()
                            ));
                            return Ok(NodeOutcome {
                                message: Message::new(self.author, output.to_content()?),
                                next: self.next,
                                trace,
                                tool_source,
                            });
                        }
                        Err(PipelineError::SchemaValidation { issues, .. })
                            if retries < self.max_schema_retries =>
                        {
                            retries += 1;
                            warn!(
                                node = %self.id,
                                attempt = retries,
                                issues = ?issues,
                                "Output rejected, requesting correction"
                            );
                            trace.push(format!(
                                "RETRY: {} correction {} of {} ({} issues)",
                                self.id,
                                retries,
                                self.max_schema_retries,
                                issues.len()
                            ));
                            request.transcript.push(Turn::Correction {
                                rejected: raw,
                                issues,
                            });
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}
