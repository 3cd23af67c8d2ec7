//! Workflow state for a single run
//!
//! Owned exclusively by the workflow engine. Nodes only ever see `&WorkflowState`;
//! the log grows through `append`, which is crate-private.

use crate::models::{ClientProfile, Message};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    client_profile: ClientProfile,
    messages: Vec<Message>,
}

impl WorkflowState {
    pub fn new(client_profile: ClientProfile) -> Self {
        Self {
            client_profile,
            messages: Vec::new(),
        }
    }

    pub fn client_profile(&self) -> &ClientProfile {
        &self.client_profile
    }

    /// Accepted messages in insertion order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub(crate) fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}
