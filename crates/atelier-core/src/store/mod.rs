//! Per-collection stores.

pub mod entity_store;
pub mod files;
pub mod messages;

pub use entity_store::{EntityStore, StoreChange};

use crate::models::{Message, Project, ProjectFile};

pub type ProjectStore = EntityStore<Project>;
pub type MessageStore = EntityStore<Message>;
pub type FileStore = EntityStore<ProjectFile>;
