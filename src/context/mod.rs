//! Context accumulation
//!
//! Turns the client profile and the accepted message log into the only context
//! text a node's reasoning step receives. Output format:
//!
//! ```text
//! CLIENT PROFILE:
//! risk_tolerance: 7
//! investment_goals: aggressive growth for retirement
//! cash_flow: 100000
//! start_date: 2024-01-01
//! end_date: 2034-01-01
//!
//! PREVIOUS AGENT OUTPUT (portfolio_constructor_agent):
//! {"assets":[...]}
//!
//! CONVERSATION HISTORY:
//! client_profile_agent: {...}
//! portfolio_constructor_agent: {...}
//! ```
//!
//! The previous-output section is omitted while the log is empty, and the
//! history section only appears in [`HistoryMode::Full`] with a non-empty log.

use crate::models::{ClientProfile, Message};
use crate::state::WorkflowState;
use sha2::{Digest, Sha256};
use tracing::debug;

/// How much of the log a node sees beyond the latest message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    /// Profile plus the latest accepted message.
    Latest,
    /// Profile, latest message and the whole log as `author: content` lines.
    Full,
}

/// Rendered context plus its SHA-256 fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContext {
    pub text: String,
    pub fingerprint: String,
}

/// Render the context text. Pure: equal inputs give byte-identical output.
pub fn render_context(profile: &ClientProfile, messages: &[Message], mode: HistoryMode) -> String {
    let mut out = String::with_capacity(256 + messages.iter().map(|m| m.content.len()).sum::<usize>() * 2);

    out.push_str("CLIENT PROFILE:\n");
    out.push_str(&profile.to_string());
    out.push('\n');

    if let Some(latest) = messages.last() {
        out.push_str("\nPREVIOUS AGENT OUTPUT (");
        out.push_str(&latest.author);
        out.push_str("):\n");
        out.push_str(&latest.content);
        out.push('\n');

        if mode == HistoryMode::Full {
            out.push_str("\nCONVERSATION HISTORY:\n");
            for message in messages {
                out.push_str(&message.author);
                out.push_str(": ");
                out.push_str(&message.content);
                out.push('\n');
            }
        }
    }

    out
}

/// Hex SHA-256 of a rendered context.
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Per-node renderer bound to a history mode.
#[derive(Debug, Clone, Copy)]
pub struct ContextAccumulator {
    mode: HistoryMode,
}

impl ContextAccumulator {
    pub fn new(mode: HistoryMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> HistoryMode {
        self.mode
    }

    pub fn render(&self, state: &WorkflowState) -> RenderedContext {
        let text = render_context(state.client_profile(), state.messages(), self.mode);
        let fingerprint = fingerprint(&text);

        debug!(
            mode = ?self.mode,
            messages = state.messages().len(),
            bytes = text.len(),
            fingerprint = %fingerprint,
            "Context rendered"
        );

        RenderedContext { text, fingerprint }
    }
}
