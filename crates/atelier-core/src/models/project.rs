use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_temp_id, Collection, Entity, OrderingKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Remote sandbox hosting the live preview, once provisioned.
    #[serde(default)]
    pub sandbox_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_temp_id(),
            name: name.into(),
            description: None,
            sandbox_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Project {
    const COLLECTION: Collection = Collection::Projects;
    const ORDER_FIELD: &'static str = "createdAt";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn scope(&self) -> Option<&str> {
        None
    }

    fn ordering_key(&self) -> OrderingKey {
        OrderingKey::Timestamp(self.created_at)
    }

    // The remote store stamps its own creation time, so match on name.
    fn reconciles_with(&self, confirmed: &Self) -> bool {
        self.name == confirmed.name
    }
}
