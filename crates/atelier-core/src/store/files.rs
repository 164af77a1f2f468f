use serde_json::json;

use crate::error::Result;
use crate::models::{ProjectFile, SyncState};

use super::FileStore;

impl FileStore {
    pub fn find_by_path(&self, project_id: &str, path: &str) -> Option<ProjectFile> {
        self.get_all(Some(project_id))
            .into_iter()
            .find(|f| f.path == path)
    }

    /// Edit a file's content. The change is visible immediately; the remote
    /// write is coalesced with further edits.
    pub fn update_content(&self, id: &str, content: impl Into<String>) -> Result<ProjectFile> {
        self.patch(id, json!({ "content": content.into() }))
    }

    /// Move a file. Unlike content edits this is sent right away.
    pub async fn rename_file(&self, id: &str, new_path: &str) -> Result<ProjectFile> {
        self.rename(id, json!({ "path": new_path })).await
    }

    pub fn sync_status(&self, id: &str) -> Option<SyncState> {
        self.scheduler().statuses().get(id)
    }
}
