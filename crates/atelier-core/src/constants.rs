//! Application-wide constants
//!
//! Centralized location for magic strings and tuning values shared by the
//! cache, the scheduler and the push subscriber.

/// Prefix that marks a locally generated id awaiting remote confirmation.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Default quiet period before a coalesced write is sent to the remote store.
pub const DEFAULT_DEBOUNCE_MS: u64 = 1500;

/// Capacity of each store's change-notification channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Capacity of each push channel in the in-memory backend.
pub const PUSH_CHANNEL_CAPACITY: usize = 256;

/// Fallback data directory when the platform data dir is unknown.
pub const DEFAULT_DATA_DIR: &str = "atelier_data";

/// Name of the cache directory inside the data directory.
pub const CACHE_DIR_NAME: &str = "cache";

/// Field carrying the parent project id on scoped documents.
pub const SCOPE_FIELD: &str = "projectId";

// Collection names, as used for cache files and push channels
pub mod collections {
    pub const PROJECTS: &str = "projects";
    pub const MESSAGES: &str = "messages";
    pub const FILES: &str = "files";
}

// Environment variables read by `SyncConfig::from_env` and `init_tracing`
pub mod env {
    pub const CACHE_DIR: &str = "ATELIER_CACHE_DIR";
    pub const DEBOUNCE_MS: &str = "ATELIER_DEBOUNCE_MS";
    pub const LOG_FILE: &str = "ATELIER_LOG_FILE";
}
