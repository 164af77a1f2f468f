use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_temp_id, Collection, Entity, OrderingKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One chat turn inside a project conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub project_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Monotonic position within the project's conversation.
    pub sequence: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a message under a fresh temporary id.
    pub fn optimistic(
        project_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
        sequence: u64,
    ) -> Self {
        Self {
            id: new_temp_id(),
            project_id: project_id.into(),
            role,
            content: content.into(),
            sequence,
            created_at: Utc::now(),
        }
    }
}

impl Entity for Message {
    const COLLECTION: Collection = Collection::Messages;
    const ORDER_FIELD: &'static str = "sequence";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn scope(&self) -> Option<&str> {
        Some(&self.project_id)
    }

    fn ordering_key(&self) -> OrderingKey {
        OrderingKey::Sequence(self.sequence)
    }

    fn reconciles_with(&self, confirmed: &Self) -> bool {
        self.project_id == confirmed.project_id
            && self.role == confirmed.role
            && self.content == confirmed.content
            && self.sequence == confirmed.sequence
    }
}
