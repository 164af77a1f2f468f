use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote-write progress of a single entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Syncing,
    Error,
}

/// Status plus the detail that goes with it. A completed write records
/// `last_synced_at`; a failed one records `error`. Never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SyncState {
    pub fn syncing() -> Self {
        Self {
            status: SyncStatus::Syncing,
            last_synced_at: None,
            error: None,
        }
    }

    pub fn synced_at(at: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Synced,
            last_synced_at: Some(at),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Error,
            last_synced_at: None,
            error: Some(message.into()),
        }
    }
}
