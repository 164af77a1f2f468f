//! Application handle.
//!
//! `SyncEngine` owns the cache, the write scheduler, the push subscriber and
//! one store per collection. It is created once at application start and
//! handed to the presentation layer; [`SyncEngine::shutdown`] ends its
//! lifecycle.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::flush_guard::{FlushGuard, TeardownOutcome};
use crate::models::Project;
use crate::realtime::RealtimeSubscriber;
use crate::remote::{ClientId, PushChannel, RemoteStore};
use crate::scheduler::WriteScheduler;
use crate::stats::SharedSyncStats;
use crate::store::{FileStore, MessageStore, ProjectStore};

pub struct SyncEngine {
    config: SyncConfig,
    cache: Arc<LocalCache>,
    scheduler: WriteScheduler,
    stats: SharedSyncStats,
    projects: Arc<ProjectStore>,
    messages: Arc<MessageStore>,
    files: Arc<FileStore>,
    flush_guard: Arc<FlushGuard>,
}

impl SyncEngine {
    /// Build an engine whose cache follows `config.cache_dir`. Must be called
    /// inside a tokio runtime.
    pub fn start(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        push: Arc<dyn PushChannel>,
    ) -> Result<Self> {
        let cache = match &config.cache_dir {
            Some(dir) => LocalCache::open(dir)?,
            None => LocalCache::disabled(),
        };
        Ok(Self::with_cache(config, Arc::new(cache), remote, push))
    }

    pub fn with_cache(
        config: SyncConfig,
        cache: Arc<LocalCache>,
        remote: Arc<dyn RemoteStore>,
        push: Arc<dyn PushChannel>,
    ) -> Self {
        let stats = SharedSyncStats::new();
        let scheduler = WriteScheduler::new(
            remote,
            config.client_id.clone(),
            config.debounce,
            stats.clone(),
        );
        let subscriber = RealtimeSubscriber::new(push, config.client_id.clone(), stats.clone());
        let skip = config.skip_stale_self_echoes;

        let projects = Arc::new(ProjectStore::new(
            cache.clone(),
            scheduler.clone(),
            subscriber.clone(),
            skip,
        ));
        let messages = Arc::new(MessageStore::new(
            cache.clone(),
            scheduler.clone(),
            subscriber.clone(),
            skip,
        ));
        let files = Arc::new(FileStore::new(cache.clone(), scheduler.clone(), subscriber, skip));
        let flush_guard = Arc::new(FlushGuard::new(scheduler.clone()));

        info!(
            "engine: started (client={}, cache={})",
            config.client_id,
            if cache.is_enabled() { "on" } else { "off" }
        );

        Self {
            config,
            cache,
            scheduler,
            stats,
            projects,
            messages,
            files,
            flush_guard,
        }
    }

    // ===== Accessors =====

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn client_id(&self) -> &ClientId {
        &self.config.client_id
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &WriteScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> &SharedSyncStats {
        &self.stats
    }

    pub fn projects(&self) -> &Arc<ProjectStore> {
        &self.projects
    }

    pub fn messages(&self) -> &Arc<MessageStore> {
        &self.messages
    }

    pub fn files(&self) -> &Arc<FileStore> {
        &self.files
    }

    pub fn flush_guard(&self) -> &Arc<FlushGuard> {
        &self.flush_guard
    }

    // ===== Projects =====

    /// Show cached projects, then replace them with the remote list and keep
    /// them live.
    pub async fn load_projects(&self) -> Result<Vec<Project>> {
        self.projects.load_from_cache(None);
        self.projects.sync_with_remote(None).await
    }

    pub async fn create_project(&self, name: &str) -> Result<Project> {
        let optimistic = self.projects.add_optimistic(Project::new(name));
        self.projects.create(optimistic).await
    }

    /// Hydrate a project's messages and files from the cache, then sync both
    /// with the remote store and subscribe to their changes.
    pub async fn open_project(&self, project_id: &str) -> Result<()> {
        self.messages.load_from_cache(Some(project_id));
        self.files.load_from_cache(Some(project_id));

        futures::try_join!(
            self.messages.sync_with_remote(Some(project_id)),
            self.files.sync_with_remote(Some(project_id)),
        )?;
        info!("engine: opened project {}", project_id);
        Ok(())
    }

    /// Stop receiving push events for a project. Cached data stays.
    pub fn close_project(&self, project_id: &str) {
        self.messages.unsubscribe(Some(project_id));
        self.files.unsubscribe(Some(project_id));
    }

    /// Delete a project remotely, then drop its messages and files locally.
    pub async fn delete_project(&self, project_id: &str) -> Result<Option<Project>> {
        let removed = self.projects.delete(project_id).await?;
        let cleared = self.clear_project_scope(project_id);
        info!(
            "engine: deleted project {} ({} dependent entities cleared)",
            project_id, cleared
        );
        Ok(removed)
    }

    /// Remove a project's messages and files from memory and cache, cancelling
    /// their queued writes.
    pub fn clear_project_scope(&self, project_id: &str) -> usize {
        self.messages.clear_scope(project_id) + self.files.clear_scope(project_id)
    }

    // ===== Lifecycle =====

    pub async fn flush_all(&self) {
        self.scheduler.flush_all().await;
    }

    /// Close every subscription and flush pending writes.
    pub async fn shutdown(&self) -> TeardownOutcome {
        self.projects.unsubscribe_all();
        self.messages.unsubscribe_all();
        self.files.unsubscribe_all();

        let outcome = self.flush_guard.on_teardown().await;
        let stats = self.stats.snapshot().total();
        if stats.writes_failed > 0 {
            warn!("engine: {} remote writes failed this session", stats.writes_failed);
        }
        info!("engine: shut down ({:?})", outcome);
        outcome
    }
}
