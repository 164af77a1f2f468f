//! Durable per-collection cache.
//!
//! Each collection is persisted as one JSON record, `{ "items": [...],
//! "lastSync": "<RFC 3339>" }`, in `<cache_dir>/<collection>.json`. Records are
//! loaded lazily on first access and written through on every mutation using
//! a write-to-temp-then-rename so an interrupted write never leaves a torn
//! file behind.
//!
//! A file that cannot be read or parsed is treated as an empty collection.
//! Items that no longer decode into their entity type are skipped on read but
//! kept on disk.
//!
//! `LocalCache::disabled()` serves contexts without local storage: every read
//! is empty and every write is a no-op.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{Collection, Entity};
use crate::remote::{document_id, merge_document, Document};

/// On-disk layout of a single collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedCollection {
    pub items: Vec<Document>,
    #[serde(rename = "lastSync", default)]
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
enum Backend {
    Disabled,
    Memory,
    Disk(PathBuf),
}

pub struct LocalCache {
    backend: Backend,
    collections: Mutex<HashMap<Collection, CachedCollection>>,
}

impl LocalCache {
    /// Durable cache rooted at `dir`, created if missing.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self::with_backend(Backend::Disk(dir.to_path_buf())))
    }

    /// Cache that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self::with_backend(Backend::Memory)
    }

    pub fn disabled() -> Self {
        Self::with_backend(Backend::Disabled)
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            collections: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, Backend::Disabled)
    }

    /// File backing `collection`, for durable caches.
    pub fn path_for(&self, collection: Collection) -> Option<PathBuf> {
        match &self.backend {
            Backend::Disk(dir) => Some(dir.join(collection.cache_file_name())),
            _ => None,
        }
    }

    // ===== Reads =====

    pub fn get_all<E: Entity>(&self) -> Vec<E> {
        self.read(E::COLLECTION, |record| {
            record.items.iter().filter_map(decode::<E>).collect()
        })
    }

    pub fn get_by_id<E: Entity>(&self, id: &str) -> Option<E> {
        self.read(E::COLLECTION, |record| {
            record
                .items
                .iter()
                .find(|item| document_id(item) == Some(id))
                .and_then(decode::<E>)
        })
    }

    pub fn get_by_filter<E: Entity>(&self, predicate: impl Fn(&E) -> bool) -> Vec<E> {
        self.read(E::COLLECTION, |record| {
            record
                .items
                .iter()
                .filter_map(decode::<E>)
                .filter(|entity| predicate(entity))
                .collect()
        })
    }

    pub fn last_sync(&self, collection: Collection) -> Option<DateTime<Utc>> {
        self.read(collection, |record| record.last_sync)
    }

    /// Copy of the raw record, including items that fail to decode.
    pub fn snapshot(&self, collection: Collection) -> CachedCollection {
        self.read(collection, Clone::clone)
    }

    // ===== Writes =====

    /// Upsert by id. An existing entry is replaced wholesale, in place.
    pub fn insert<E: Entity>(&self, entity: &E) {
        self.insert_many(std::slice::from_ref(entity));
    }

    pub fn insert_many<E: Entity>(&self, entities: &[E]) {
        let documents: Vec<Document> = entities.iter().filter_map(encode).collect();
        if documents.is_empty() {
            return;
        }
        self.mutate(E::COLLECTION, |record| {
            for document in documents {
                upsert(&mut record.items, document);
            }
        });
    }

    /// Merge `partial` into the stored entry. Returns false if `id` is absent.
    pub fn update<E: Entity>(&self, id: &str, partial: &Document) -> bool {
        let mut found = false;
        self.mutate(E::COLLECTION, |record| {
            if let Some(item) = record
                .items
                .iter_mut()
                .find(|item| document_id(item) == Some(id))
            {
                merge_document(item, partial);
                found = true;
            }
        });
        found
    }

    /// Swap the entry stored under `old_id` for `entity`, keeping its
    /// position. Appends when `old_id` is absent.
    pub fn replace<E: Entity>(&self, old_id: &str, entity: &E) {
        let Some(document) = encode(entity) else {
            return;
        };
        let new_id = entity.id().to_string();
        self.mutate(E::COLLECTION, |record| {
            record
                .items
                .retain(|item| document_id(item) != Some(new_id.as_str()) || new_id == old_id);
            match record
                .items
                .iter_mut()
                .find(|item| document_id(item) == Some(old_id))
            {
                Some(slot) => *slot = document,
                None => record.items.push(document),
            }
        });
    }

    pub fn delete<E: Entity>(&self, id: &str) -> bool {
        self.delete_many::<E, _>([id]) > 0
    }

    pub fn delete_many<E: Entity, S: AsRef<str>>(&self, ids: impl IntoIterator<Item = S>) -> usize {
        let ids: Vec<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        let mut removed = 0;
        self.mutate(E::COLLECTION, |record| {
            let before = record.items.len();
            record
                .items
                .retain(|item| !document_id(item).is_some_and(|id| ids.iter().any(|x| x == id)));
            removed = before - record.items.len();
        });
        removed
    }

    /// Replace the whole collection and stamp a new `lastSync`.
    pub fn set_items<E: Entity>(&self, items: &[E]) {
        let documents: Vec<Document> = items.iter().filter_map(encode).collect();
        self.mutate(E::COLLECTION, |record| {
            record.items = documents;
            record.last_sync = Some(Utc::now());
        });
    }

    /// Replace only the entries belonging to `scope` and stamp a new
    /// `lastSync`. Entries of other scopes are left untouched.
    pub fn replace_scope<E: Entity>(&self, scope: &str, items: &[E]) {
        let documents: Vec<Document> = items
            .iter()
            .filter(|e| e.scope() == Some(scope))
            .filter_map(encode)
            .collect();
        self.mutate(E::COLLECTION, |record| {
            record
                .items
                .retain(|item| !decode::<E>(item).is_some_and(|e| e.scope() == Some(scope)));
            record.items.extend(documents);
            record.last_sync = Some(Utc::now());
        });
    }

    /// Remove every entry belonging to `scope`. Returns how many were removed.
    pub fn delete_scope<E: Entity>(&self, scope: &str) -> usize {
        let mut removed = 0;
        self.mutate(E::COLLECTION, |record| {
            let before = record.items.len();
            record
                .items
                .retain(|item| !decode::<E>(item).is_some_and(|e| e.scope() == Some(scope)));
            removed = before - record.items.len();
        });
        removed
    }

    pub fn clear(&self, collection: Collection) {
        self.mutate(collection, |record| *record = CachedCollection::default());
    }

    // ===== Internals =====

    fn read<R>(&self, collection: Collection, f: impl FnOnce(&CachedCollection) -> R) -> R {
        if !self.is_enabled() {
            return f(&CachedCollection::default());
        }
        let mut collections = self.collections.lock();
        let record = collections
            .entry(collection)
            .or_insert_with(|| self.load(collection));
        f(record)
    }

    fn mutate(&self, collection: Collection, f: impl FnOnce(&mut CachedCollection)) {
        if !self.is_enabled() {
            return;
        }
        let mut collections = self.collections.lock();
        let record = collections
            .entry(collection)
            .or_insert_with(|| self.load(collection));
        f(record);
        self.persist(collection, record);
    }

    fn load(&self, collection: Collection) -> CachedCollection {
        let Some(path) = self.path_for(collection) else {
            return CachedCollection::default();
        };
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return CachedCollection::default();
            }
            Err(e) => {
                warn!("cache: failed to read {}: {}, treating as empty", path.display(), e);
                return CachedCollection::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!("cache: corrupt {} ({}), treating as empty", path.display(), e);
                CachedCollection::default()
            }
        }
    }

    fn persist(&self, collection: Collection, record: &CachedCollection) {
        let Some(path) = self.path_for(collection) else {
            return;
        };
        if let Err(e) = write_atomically(&path, record) {
            warn!("cache: failed to persist {}: {}", collection, e);
        } else {
            debug!("cache: persisted {} ({} items)", collection, record.items.len());
        }
    }
}

fn write_atomically(path: &Path, record: &CachedCollection) -> Result<()> {
    let bytes = serde_json::to_vec(record)?;
    let temp_file = path.with_extension("json.tmp");
    std::fs::write(&temp_file, &bytes)?;
    std::fs::rename(&temp_file, path)?;
    Ok(())
}

fn upsert(items: &mut Vec<Document>, document: Document) {
    let id = document_id(&document).map(str::to_string);
    match items
        .iter_mut()
        .find(|item| id.is_some() && document_id(item) == id.as_deref())
    {
        Some(slot) => *slot = document,
        None => items.push(document),
    }
}

fn encode<E: Entity>(entity: &E) -> Option<Document> {
    match serde_json::to_value(entity) {
        Ok(document) => Some(document),
        Err(e) => {
            warn!("cache: cannot encode {} {}: {}", E::COLLECTION, entity.id(), e);
            None
        }
    }
}

fn decode<E: Entity>(document: &Document) -> Option<E> {
    serde_json::from_value(document.clone()).ok()
}
