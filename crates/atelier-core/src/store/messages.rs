use crate::error::Result;
use crate::models::{Message, MessageRole};

use super::MessageStore;

impl MessageStore {
    /// Sequence number for the next message appended to `project_id`.
    pub fn next_sequence(&self, project_id: &str) -> u64 {
        self.get_all(Some(project_id))
            .last()
            .map(|m| m.sequence + 1)
            .unwrap_or(0)
    }

    /// Append a message locally under a temporary id. The remote create is
    /// left to the caller; its confirmation event reconciles the entry.
    pub fn add_optimistic_message(
        &self,
        project_id: &str,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Message {
        let sequence = self.next_sequence(project_id);
        self.add_optimistic(Message::optimistic(project_id, role, content, sequence))
    }

    /// Append a message locally and create it remotely in one step.
    pub async fn send_message(
        &self,
        project_id: &str,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Result<Message> {
        let optimistic = self.add_optimistic_message(project_id, role, content);
        self.create(optimistic).await
    }
}
