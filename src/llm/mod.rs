//! Reasoning service boundary
//!
//! A node hands the service its role prompt, the rendered context, the output
//! schema it expects and the tools it may call. The service answers either with
//! structured content or with tool invocation requests.

use crate::models::{ToolCall, ToolDescriptor};
use crate::validation::OutputSchema;
use crate::Result;
use async_trait::async_trait;

pub mod openai;
pub use openai::OpenAiClient;

/// One exchange appended after the initial context during a node invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    /// Tool calls the service asked for.
    ToolRequests(Vec<ToolCall>),
    /// Output of one of those calls.
    ToolResult {
        call_id: String,
        name: String,
        content: String,
    },
    /// A rejected structured output and the reasons it was rejected.
    Correction {
        rejected: String,
        issues: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    /// Author name of the node issuing the request.
    pub role: String,
    pub system_prompt: String,
    pub context: String,
    pub schema: OutputSchema,
    pub tools: Vec<ToolDescriptor>,
    pub transcript: Vec<Turn>,
}

impl ReasoningRequest {
    /// Number of corrective turns already in the transcript.
    pub fn corrections(&self) -> usize {
        self.transcript
            .iter()
            .filter(|t| matches!(t, Turn::Correction { .. }))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningResponse {
    Structured(String),
    ToolCalls(Vec<ToolCall>),
}

/// Trait for the external completion capability
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, request: &ReasoningRequest) -> Result<ReasoningResponse>;
}

/// Text sent back to the service when its output fails validation.
pub fn correction_prompt(schema: OutputSchema, issues: &[String]) -> String {
    format!(
        "Your previous output was rejected because it does not satisfy the {} schema.\n\
         Issues:\n- {}\n\n\
         Return a corrected {} object only, with every required field and no extra fields.",
        schema.name(),
        issues.join("\n- "),
        schema.name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correction_prompt_lists_every_issue() {
        let prompt = correction_prompt(
            OutputSchema::Portfolio,
            &["too few assets".to_string(), "sum is 90".to_string()],
        );
        assert!(prompt.contains("Portfolio schema"));
        assert!(prompt.contains("- too few assets\n- sum is 90"));
    }
}
