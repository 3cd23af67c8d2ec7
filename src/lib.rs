//! Analyst Pipeline
//!
//! A multi-stage financial advisory pipeline that:
//! - Profiles a client from a structured intake record
//! - Builds an initial portfolio of 6-10 assets
//! - Researches the holdings with market-data tools (remote MCP provider or local Yahoo data)
//! - Refines the portfolio using the research
//!
//! Every stage output is validated against its schema before it is handed on.
//!
//! UNIFIED LOOP:
//! PROFILE → CONSTRUCT → RESEARCH → REFINE → COMPLETE

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod models;
pub mod state;
pub mod tools;
pub mod validation;
pub mod workflow;

pub use error::Result;

// Re-export common types
pub use config::Settings;
pub use models::*;
pub use workflow::{build_default_workflow, workflow_from_settings, NodeId, Workflow, WorkflowRun};
