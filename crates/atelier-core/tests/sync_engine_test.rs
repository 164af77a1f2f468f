//! End-to-end tests driving `SyncEngine` against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use atelier_core::memory::RemoteCall;
use atelier_core::models::{Collection, Message, MessageRole, ProjectFile, SyncStatus};
use atelier_core::realtime::EventKind;
use atelier_core::{
    ClientId, InMemoryBackend, LocalCache, RemoteError, SyncConfig, SyncEngine, SyncError,
    TeardownOutcome,
};
use serde_json::{json, Value};
use tempfile::TempDir;

const ME: &str = "client-me";

fn engine(backend: &Arc<InMemoryBackend>) -> SyncEngine {
    let config = SyncConfig::without_cache().with_client_id(ClientId::new(ME));
    SyncEngine::with_cache(
        config,
        Arc::new(LocalCache::in_memory()),
        backend.clone(),
        backend.clone(),
    )
}

fn message_doc(id: &str, project: &str, content: &str, sequence: u64) -> Value {
    json!({
        "id": id,
        "projectId": project,
        "role": "user",
        "content": content,
        "sequence": sequence,
    })
}

fn file_doc(id: &str, project: &str, path: &str) -> Value {
    json!({"id": id, "projectId": project, "path": path, "content": ""})
}

/// Let spawned subscription tasks drain their channels.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_rapid_edits_produce_single_write() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(Collection::Messages, vec![message_doc("m1", "p1", "", 0)]);
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    for content in ["a", "ab", "abc"] {
        engine.messages().modify("m1", |m| m.content = content.to_string())?;
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    assert!(backend.updates_for("m1").is_empty());

    tokio::time::sleep(Duration::from_millis(1600)).await;
    let updates = backend.updates_for("m1");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["content"], "abc");
    assert_eq!(
        engine.scheduler().statuses().status("m1"),
        Some(SyncStatus::Synced)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_delete_before_quiet_period_sends_no_write() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(Collection::Files, vec![file_doc("f1", "p1", "src/main.rs")]);
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    engine.files().update_content("f1", "fn main() {}")?;
    engine.files().delete("f1").await?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(backend.updates_for("f1").is_empty());
    assert!(backend.document(Collection::Files, "f1").is_none());
    assert!(backend
        .journal()
        .iter()
        .any(|call| matches!(call, RemoteCall::Delete { id, .. } if id == "f1")));
    assert!(engine.files().get("f1").is_none());
    assert_eq!(engine.scheduler().statuses().get("f1"), None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_deleting_temporary_entity_stays_local() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    let draft = engine
        .files()
        .add_optimistic(ProjectFile::new("p1", "draft.rs", ""));
    engine.files().delete(&draft.id).await?;

    assert!(engine.files().get_all(Some("p1")).is_empty());
    assert!(!backend
        .journal()
        .iter()
        .any(|call| matches!(call, RemoteCall::Delete { .. })));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_event_replaces_optimistic_message() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    let mut optimistic = Message::optimistic("p1", MessageRole::User, "hi", 0);
    optimistic.id = "temp_1".to_string();
    engine.messages().add_optimistic(optimistic);
    assert!(engine.messages().is_pending("temp_1"));

    let confirmed = message_doc("srv_1", "p1", "hi", 0);
    backend.publish(
        Collection::Messages,
        EventKind::Created,
        confirmed.clone(),
        Some(ClientId::new("someone-else")),
    );
    settle().await;

    let messages = engine.messages().get_all(Some("p1"));
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "srv_1");
    assert!(engine.messages().pending_ids().is_empty());
    assert!(engine.cache().get_by_id::<Message>("temp_1").is_none());
    assert!(engine.cache().get_by_id::<Message>("srv_1").is_some());

    // A second delivery of the same confirmation changes nothing.
    backend.publish(Collection::Messages, EventKind::Created, confirmed, None);
    settle().await;
    assert_eq!(engine.messages().get_all(Some("p1")).len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_create_is_appended() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    engine
        .messages()
        .add_optimistic_message("p1", MessageRole::User, "mine");
    backend.publish(
        Collection::Messages,
        EventKind::Created,
        message_doc("srv_9", "p1", "theirs", 0),
        None,
    );
    settle().await;

    let messages = engine.messages().get_all(Some("p1"));
    assert_eq!(messages.len(), 2);
    assert_eq!(engine.messages().pending_ids().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_identical_optimistic_entries_confirm_first_match() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    let first = engine
        .messages()
        .add_optimistic(Message::optimistic("p1", MessageRole::User, "ok", 3));
    let second = engine
        .messages()
        .add_optimistic(Message::optimistic("p1", MessageRole::User, "ok", 3));

    backend.publish(
        Collection::Messages,
        EventKind::Created,
        message_doc("srv_1", "p1", "ok", 3),
        None,
    );
    settle().await;

    assert!(engine.messages().get(&first.id).is_none());
    assert!(engine.messages().is_pending(&second.id));
    assert!(engine.messages().get("srv_1").is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_events_for_other_scopes_are_ignored() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(Collection::Messages, vec![message_doc("m1", "A", "kept", 0)]);
    let engine = engine(&backend);
    engine.open_project("A").await?;

    backend.publish(
        Collection::Messages,
        EventKind::Created,
        message_doc("b1", "B", "elsewhere", 0),
        None,
    );
    backend.publish(
        Collection::Messages,
        EventKind::Deleted,
        json!({"id": "m1", "projectId": "B"}),
        None,
    );
    settle().await;

    let all = engine.messages().get_all(None);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "m1");
    assert!(engine.cache().get_by_id::<Message>("b1").is_none());
    assert_eq!(
        engine
            .stats()
            .snapshot()
            .collection(Collection::Messages)
            .events_discarded,
        2
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cached_project_survives_restart_offline() -> Result<()> {
    let dir = TempDir::new()?;
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(
        Collection::Messages,
        vec![
            message_doc("m3", "p1", "third", 2),
            message_doc("m1", "p1", "first", 0),
            message_doc("m2", "p1", "second", 1),
        ],
    );

    {
        let config = SyncConfig::new(dir.path()).with_client_id(ClientId::new(ME));
        let engine = SyncEngine::start(config, backend.clone(), backend.clone())?;
        engine.open_project("p1").await?;
        engine.shutdown().await;
    }

    let offline = Arc::new(InMemoryBackend::new());
    offline.fail_with(RemoteError::Unavailable("offline".into()));
    let config = SyncConfig::new(dir.path()).with_client_id(ClientId::new(ME));
    let engine = SyncEngine::start(config, offline.clone(), offline.clone())?;

    let result = engine.open_project("p1").await;
    assert!(matches!(
        result,
        Err(SyncError::Remote(RemoteError::Unavailable(_)))
    ));

    let sequences: Vec<u64> = engine
        .messages()
        .get_all(Some("p1"))
        .iter()
        .map(|m| m.sequence)
        .collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert!(engine.cache().last_sync(Collection::Messages).is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_flush_settles_every_pending_write() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(
        Collection::Files,
        vec![file_doc("f1", "p1", "a.rs"), file_doc("f2", "p1", "b.rs")],
    );
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    engine.files().update_content("f1", "one")?;
    engine.files().update_content("f2", "two")?;
    assert_eq!(engine.scheduler().statuses().count(SyncStatus::Syncing), 2);

    backend.fail_with(RemoteError::Unavailable("offline".into()));
    engine.flush_all().await;

    let statuses = engine.scheduler().statuses();
    assert_eq!(engine.scheduler().pending_count(), 0);
    assert_eq!(statuses.count(SyncStatus::Syncing), 0);
    assert_eq!(statuses.count(SyncStatus::Error), 2);
    let failed = engine.files().sync_status("f1").unwrap();
    assert_eq!(failed.error.as_deref(), Some("Remote unavailable: offline"));
    assert!(failed.last_synced_at.is_none());
    // The local edit is still shown.
    assert_eq!(engine.files().get("f1").unwrap().content, "one");

    backend.recover();
    assert!(engine.scheduler().retry("f1").await);
    assert_eq!(statuses.status("f1"), Some(SyncStatus::Synced));
    assert_eq!(
        backend.document(Collection::Files, "f1").unwrap()["content"],
        "one"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_delete_project_clears_only_its_scope() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(
        Collection::Projects,
        vec![
            json!({"id": "P1", "name": "one", "createdAt": "2024-01-01T00:00:00Z"}),
            json!({"id": "P2", "name": "two", "createdAt": "2024-01-02T00:00:00Z"}),
        ],
    );
    backend.seed(
        Collection::Messages,
        vec![
            message_doc("m1", "P1", "a", 0),
            message_doc("m2", "P1", "b", 1),
            message_doc("m3", "P2", "c", 0),
        ],
    );
    backend.seed(
        Collection::Files,
        vec![file_doc("f1", "P1", "a.rs"), file_doc("f2", "P2", "b.rs")],
    );

    let engine = engine(&backend);
    let projects = engine.load_projects().await?;
    assert_eq!(projects.len(), 2);
    engine.open_project("P1").await?;
    engine.open_project("P2").await?;
    engine.files().update_content("f1", "unsent")?;

    engine.delete_project("P1").await?;

    let remaining: Vec<String> = engine
        .projects()
        .get_all(None)
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(remaining, vec!["P2"]);

    let cache = engine.cache();
    assert!(cache
        .get_by_filter::<Message>(|m| m.project_id == "P1")
        .is_empty());
    assert!(cache
        .get_by_filter::<ProjectFile>(|f| f.project_id == "P1")
        .is_empty());
    assert_eq!(
        cache
            .get_by_filter::<Message>(|m| m.project_id == "P2")
            .len(),
        1
    );
    assert_eq!(
        cache
            .get_by_filter::<ProjectFile>(|f| f.project_id == "P2")
            .len(),
        1
    );
    assert!(engine.messages().get_all(Some("P1")).is_empty());
    assert_eq!(engine.messages().get_all(Some("P2")).len(), 1);
    assert_eq!(engine.scheduler().pending_count(), 0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(backend.updates_for("f1").is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_create_project_confirms_once() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let engine = engine(&backend);
    engine.load_projects().await?;

    let project = engine.create_project("demo").await?;
    assert_eq!(project.id, "srv_1");
    settle().await;

    let projects = engine.projects().get_all(None);
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].id, "srv_1");
    assert!(engine.projects().pending_ids().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_restores_entity() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(Collection::Files, vec![file_doc("f1", "p1", "a.rs")]);
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    backend.fail_with(RemoteError::Rejected("read-only".into()));
    let result = engine.files().delete("f1").await;

    assert!(matches!(
        result,
        Err(SyncError::Remote(RemoteError::Rejected(_)))
    ));
    assert!(engine.files().get("f1").is_some());
    assert!(engine.cache().get_by_id::<ProjectFile>("f1").is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_keeps_unsent_edit() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(Collection::Files, vec![file_doc("f1", "p1", "a.rs")]);
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    engine.files().update_content("f1", "unsaved work")?;
    backend.fail_with(RemoteError::Rejected("read-only".into()));
    assert!(engine.files().delete("f1").await.is_err());

    assert_eq!(engine.files().get("f1").unwrap().content, "unsaved work");
    assert_eq!(
        engine.files().sync_status("f1").map(|s| s.status),
        Some(SyncStatus::Syncing)
    );

    backend.recover();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        backend.document(Collection::Files, "f1").unwrap()["content"],
        "unsaved work"
    );
    assert_eq!(
        engine.files().sync_status("f1").map(|s| s.status),
        Some(SyncStatus::Synced)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_flush_resends_failed_write() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(Collection::Files, vec![file_doc("f1", "p1", "a.rs")]);
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    backend.fail_with(RemoteError::Unavailable("offline".into()));
    engine.files().update_content("f1", "one")?;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        engine.files().sync_status("f1").map(|s| s.status),
        Some(SyncStatus::Error)
    );

    backend.recover();
    engine.flush_all().await;

    assert_eq!(
        engine.files().sync_status("f1").map(|s| s.status),
        Some(SyncStatus::Synced)
    );
    assert_eq!(
        backend.document(Collection::Files, "f1").unwrap()["content"],
        "one"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_next_edit_resends_failed_fields() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(Collection::Files, vec![file_doc("f1", "p1", "a.rs")]);
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    backend.fail_with(RemoteError::Unavailable("offline".into()));
    engine
        .files()
        .patch("f1", json!({"content": "body", "path": "b.rs"}))?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    backend.recover();
    engine.files().update_content("f1", "body v2")?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let remote = backend.document(Collection::Files, "f1").unwrap();
    assert_eq!(remote["content"], "body v2");
    assert_eq!(remote["path"], "b.rs");
    assert_eq!(
        engine.files().sync_status("f1").map(|s| s.status),
        Some(SyncStatus::Synced)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_resync_after_failure_shows_local_value() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(Collection::Files, vec![file_doc("f1", "p1", "a.rs")]);
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    backend.fail_with(RemoteError::Unavailable("offline".into()));
    engine.files().update_content("f1", "local edit")?;
    tokio::time::sleep(Duration::from_secs(2)).await;
    backend.recover();

    engine.open_project("p1").await?;

    assert_eq!(engine.files().get("f1").unwrap().content, "local edit");
    assert_eq!(
        engine.files().sync_status("f1").map(|s| s.status),
        Some(SyncStatus::Error)
    );
    assert_eq!(
        engine.cache().get_by_id::<ProjectFile>("f1").unwrap().content,
        "local edit"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stale_self_echo_does_not_revert_local_edit() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(Collection::Files, vec![file_doc("f1", "p1", "a.rs")]);
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    engine.files().update_content("f1", "newest")?;
    backend.publish(
        Collection::Files,
        EventKind::Updated,
        json!({"id": "f1", "projectId": "p1", "path": "a.rs", "content": "older"}),
        Some(ClientId::new(ME)),
    );
    settle().await;
    assert_eq!(engine.files().get("f1").unwrap().content, "newest");

    backend.publish(
        Collection::Files,
        EventKind::Updated,
        json!({"id": "f1", "projectId": "p1", "path": "a.rs", "content": "from elsewhere"}),
        Some(ClientId::new("other")),
    );
    settle().await;
    assert_eq!(engine.files().get("f1").unwrap().content, "from elsewhere");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_pending_writes() -> Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.seed(Collection::Files, vec![file_doc("f1", "p1", "a.rs")]);
    let engine = engine(&backend);
    engine.open_project("p1").await?;

    engine.files().update_content("f1", "bye")?;
    let outcome = engine.shutdown().await;

    assert_eq!(outcome, TeardownOutcome::Flushed { writes: 1 });
    assert_eq!(backend.updates_for("f1"), vec![json!({"content": "bye"})]);
    assert!(!engine.files().is_subscribed(Some("p1")));
    Ok(())
}
