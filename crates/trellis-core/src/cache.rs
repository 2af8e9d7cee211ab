//! Persisted per-file cache records and run metadata
//!
//! The dependency graph is never persisted; only content hashes,
//! modification times and a small run summary survive between runs.

use crate::error::CacheError;
use crate::model::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Cache directory: .trellis/
pub const CACHE_DIR: &str = ".trellis";

/// File cache
pub const CACHE_FILE: &str = "cache.json";

/// Bumped whenever the on-disk layout changes; older files are discarded.
pub const CACHE_VERSION: u32 = 1;

/// One persisted record per file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_hash: ContentHash,
    pub modified_time_millis: i64,
}

/// Summary of the last completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub last_run_timestamp: DateTime<Utc>,
    pub file_count: usize,
    pub symbol_count: usize,
}

/// Storage contract consumed by the change detector and the orchestrator.
/// All keys are canonical paths.
pub trait CacheStore: Send + Sync {
    fn get(&self, path: &Path) -> Option<CacheEntry>;

    fn put(&mut self, path: &Path, entry: CacheEntry);

    fn remove(&mut self, path: &Path);

    /// Every path with a record.
    fn paths(&self) -> Vec<PathBuf>;

    /// Files a previous run left unresolved; they belong to the next change set.
    fn pending(&self) -> Vec<PathBuf>;

    fn set_pending(&mut self, paths: Vec<PathBuf>);

    fn load_metadata(&self) -> Option<RunMetadata>;

    fn save_metadata(&mut self, metadata: RunMetadata);

    /// Write pending changes to durable storage.
    fn flush(&mut self) -> Result<(), CacheError>;

    fn get_hash(&self, path: &Path) -> Option<ContentHash> {
        self.get(path).map(|e| e.content_hash)
    }

    fn get_mod_time(&self, path: &Path) -> Option<i64> {
        self.get(path).map(|e| e.modified_time_millis)
    }

    fn set_hash(&mut self, path: &Path, content_hash: ContentHash) {
        let modified_time_millis = self.get_mod_time(path).unwrap_or(0);
        self.put(path, CacheEntry { content_hash, modified_time_millis });
    }

    /// Refresh the stored modification time. No-op when the file has no entry yet.
    fn set_mod_time(&mut self, path: &Path, modified_time_millis: i64) {
        if let Some(content_hash) = self.get_hash(path) {
            self.put(path, CacheEntry { content_hash, modified_time_millis });
        }
    }
}

/// Serialized form shared by every store implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheData {
    pub version: u32,
    pub files: BTreeMap<String, CacheEntry>,
    pub metadata: Option<RunMetadata>,
    #[serde(default)]
    pub pending: BTreeSet<String>,
}

impl Default for CacheData {
    fn default() -> Self {
        CacheData {
            version: CACHE_VERSION,
            files: BTreeMap::new(),
            metadata: None,
            pending: BTreeSet::new(),
        }
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl CacheData {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn paths(&self) -> Vec<PathBuf> {
        self.files.keys().map(PathBuf::from).collect()
    }

    fn pending(&self) -> Vec<PathBuf> {
        self.pending.iter().map(PathBuf::from).collect()
    }

    /// Returns whether the pending set changed.
    fn set_pending(&mut self, paths: Vec<PathBuf>) -> bool {
        let pending: BTreeSet<String> = paths.iter().map(|p| key(p)).collect();
        let changed = pending != self.pending;
        self.pending = pending;
        changed
    }
}

/// In-memory store, used when caching is disabled and in tests.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    data: CacheData,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &CacheData {
        &self.data
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, path: &Path) -> Option<CacheEntry> {
        self.data.files.get(&key(path)).cloned()
    }

    fn put(&mut self, path: &Path, entry: CacheEntry) {
        self.data.files.insert(key(path), entry);
    }

    fn remove(&mut self, path: &Path) {
        self.data.files.remove(&key(path));
    }

    fn paths(&self) -> Vec<PathBuf> {
        self.data.paths()
    }

    fn pending(&self) -> Vec<PathBuf> {
        self.data.pending()
    }

    fn set_pending(&mut self, paths: Vec<PathBuf>) {
        self.data.set_pending(paths);
    }

    fn load_metadata(&self) -> Option<RunMetadata> {
        self.data.metadata.clone()
    }

    fn save_metadata(&mut self, metadata: RunMetadata) {
        self.data.metadata = Some(metadata);
    }

    fn flush(&mut self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// JSON-file store at `<cache_dir>/cache.json`.
#[derive(Debug)]
pub struct JsonCacheStore {
    path: PathBuf,
    data: CacheData,
    dirty: bool,
}

impl JsonCacheStore {
    /// Open the store in `cache_dir`. A missing, unreadable, corrupt or
    /// outdated file yields an empty store.
    pub fn open(cache_dir: &Path) -> Self {
        let path = cache_dir.join(CACHE_FILE);
        let data = match std::fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<CacheData>(&json) {
                Ok(data) if data.version == CACHE_VERSION => data,
                Ok(data) => {
                    tracing::warn!(
                        "Discarding cache {} with version {} (expected {})",
                        path.display(),
                        data.version,
                        CACHE_VERSION
                    );
                    CacheData::default()
                }
                Err(e) => {
                    tracing::warn!("Discarding corrupt cache {}: {}", path.display(), e);
                    CacheData::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheData::default(),
            Err(e) => {
                tracing::warn!("Cannot read cache {}: {}", path.display(), e);
                CacheData::default()
            }
        };
        tracing::debug!("Cache loaded from {} ({} entries)", path.display(), data.len());

        JsonCacheStore { path, data, dirty: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &CacheData {
        &self.data
    }
}

impl CacheStore for JsonCacheStore {
    fn get(&self, path: &Path) -> Option<CacheEntry> {
        self.data.files.get(&key(path)).cloned()
    }

    fn put(&mut self, path: &Path, entry: CacheEntry) {
        self.data.files.insert(key(path), entry);
        self.dirty = true;
    }

    fn remove(&mut self, path: &Path) {
        if self.data.files.remove(&key(path)).is_some() {
            self.dirty = true;
        }
    }

    fn paths(&self) -> Vec<PathBuf> {
        self.data.paths()
    }

    fn pending(&self) -> Vec<PathBuf> {
        self.data.pending()
    }

    fn set_pending(&mut self, paths: Vec<PathBuf>) {
        if self.data.set_pending(paths) {
            self.dirty = true;
        }
    }

    fn load_metadata(&self) -> Option<RunMetadata> {
        self.data.metadata.clone()
    }

    fn save_metadata(&mut self, metadata: RunMetadata) {
        self.data.metadata = Some(metadata);
        self.dirty = true;
    }

    fn flush(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_error(&tmp))?;
        std::fs::rename(&tmp, &self.path).map_err(io_error(&self.path))?;

        self.dirty = false;
        tracing::debug!("Cache saved: {}", self.path.display());
        Ok(())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError {
    let path = path.to_path_buf();
    move |source| CacheError::Io { path, source }
}

/// Get cache directory path
pub fn cache_dir(root: &Path) -> PathBuf {
    root.join(CACHE_DIR)
}

/// Remove a cache directory. Missing directories are fine.
pub fn clear_cache(cache_dir: &Path) -> std::io::Result<()> {
    if cache_dir.exists() {
        std::fs::remove_dir_all(cache_dir)?;
    }
    Ok(())
}
