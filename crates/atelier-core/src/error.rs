use crate::models::Collection;

/// Failure reported by the remote document store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Subscription to {channel} failed: {reason}")]
    Subscription { channel: String, reason: String },

    #[error("Undecodable push event: {0}")]
    Decode(String),

    #[error("Unknown {collection} entity: {id}")]
    UnknownEntity { collection: Collection, id: String },
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
