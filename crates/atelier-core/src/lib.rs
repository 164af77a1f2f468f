pub mod cache;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod flush_guard;
pub mod memory;
pub mod models;
pub mod realtime;
pub mod remote;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod tracing_setup;

pub use cache::LocalCache;
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{RemoteError, Result, SyncError};
pub use flush_guard::{FlushGuard, TeardownOutcome};
pub use memory::InMemoryBackend;
pub use remote::{ClientId, Document, PushChannel, RawPushMessage, RemoteStore};
pub use scheduler::{SyncStatusMap, WriteScheduler};
pub use store::{EntityStore, FileStore, MessageStore, ProjectStore, StoreChange};
