pub mod collection;
pub mod entity;
pub mod file;
pub mod message;
pub mod project;
pub mod sync_status;

pub use collection::Collection;
pub use entity::{is_temp_id, new_temp_id, scope_matches, Entity, OrderingKey};
pub use file::ProjectFile;
pub use message::{Message, MessageRole};
pub use project::Project;
pub use sync_status::{SyncState, SyncStatus};
