use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_temp_id, Collection, Entity, OrderingKey};

/// A source file inside a project's sandbox, keyed by path for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    pub id: String,
    pub project_id: String,
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ProjectFile {
    pub fn new(
        project_id: impl Into<String>,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: new_temp_id(),
            project_id: project_id.into(),
            path: path.into(),
            content: content.into(),
            updated_at: Utc::now(),
        }
    }
}

impl Entity for ProjectFile {
    const COLLECTION: Collection = Collection::Files;
    const ORDER_FIELD: &'static str = "path";

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
        OrderingKey::Path(self.path.clone())
    }
}
