/*!
 * Translation cache.
 *
 * Content-addressed records, held in memory and backed by a directory with
 * one JSON file per key. Files are written to a temp file and renamed, so a
 * reader sees either nothing or a whole record. Keys embed the model, the
 * prompt version and the style and glossary digests, so anything that would
 * change a translation also changes its key.
 *
 * `Singleflight` makes sure a key is built at most once at a time: the first
 * caller runs the build, later callers with the same key await the same
 * shared future.
 */

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use crate::app_config::CacheConfig;
use crate::errors::TranslationError;
use crate::file_utils::FileManager;

const PLAN_DIR: &str = "plans";

/// Everything that goes into a cache key
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyParts<'a> {
    pub model: &'a str,
    pub prompt_version: u32,
    pub target_language: &'a str,
    pub segment_id: &'a str,
    pub style_digest: &'a str,
    pub glossary_digest: &'a str,
}

/// Hex sha256 over the key parts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(parts: CacheKeyParts<'_>) -> Self {
        let mut hasher = Sha256::new();
        let version = parts.prompt_version.to_string();
        let target = parts.target_language.to_lowercase();
        for field in [
            parts.model,
            version.as_str(),
            target.as_str(),
            parts.segment_id,
            parts.style_digest,
            parts.glossary_digest,
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key for a non-segment artefact such as a preparation plan
    pub fn from_raw(raw: &str) -> Self {
        Self(format!("{:x}", Sha256::digest(raw.as_bytes())))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One stored translation; never mutated once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub key: CacheKey,
    pub model: String,
    pub provider_id: String,
    pub prompt_version: u32,
    pub source_hash: String,
    pub translation: String,
    pub created_at: DateTime<Utc>,
    /// Entities the model reported, replayed into the glossary on a hit
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub named_entities: BTreeMap<String, String>,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
}

/// Hash of the source text stored alongside a record
pub fn source_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Counters kept by the cache itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
    pub writes: usize,
}

/// In-memory map backed by a directory of JSON records
pub struct TranslationCache {
    enabled: bool,
    directory: Option<PathBuf>,
    ttl: Option<Duration>,
    records: RwLock<HashMap<CacheKey, Arc<CacheRecord>>>,
    plans: RwLock<HashMap<CacheKey, serde_json::Value>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    writes: AtomicUsize,
}

impl std::fmt::Debug for TranslationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationCache")
            .field("enabled", &self.enabled)
            .field("directory", &self.directory)
            .field("entries", &self.len())
            .finish()
    }
}

impl TranslationCache {
    /// Memory-only cache, used by tests and `--no-cache` style dry runs
    pub fn in_memory() -> Self {
        Self::build(true, None, None)
    }

    /// Cache that stores nothing
    pub fn disabled() -> Self {
        Self::build(false, None, None)
    }

    fn build(enabled: bool, directory: Option<PathBuf>, ttl: Option<Duration>) -> Self {
        Self {
            enabled,
            directory,
            ttl,
            records: RwLock::new(HashMap::new()),
            plans: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Open the cache described by the configuration and load stored records
    pub fn open(config: &CacheConfig) -> Result<Self, TranslationError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let directory = config.directory.clone();
        FileManager::ensure_dir(directory.join(PLAN_DIR))
            .map_err(|e| TranslationError::Io(std::io::Error::other(e.to_string())))?;

        let cache = Self::build(true, Some(directory.clone()), config.ttl_seconds.map(Duration::from_secs));
        let loaded = cache.load_records(&directory)?;
        let plans = cache.load_plans(&directory.join(PLAN_DIR))?;
        info!(
            "Translation cache at {:?}: {} records, {} plans",
            directory, loaded, plans
        );
        Ok(cache)
    }

    fn load_records(&self, directory: &Path) -> Result<usize, TranslationError> {
        let mut records = self.records.write();
        for path in json_files(directory)? {
            let parsed = std::fs::read(&path)
                .map_err(TranslationError::from)
                .and_then(|bytes| serde_json::from_slice::<CacheRecord>(&bytes).map_err(TranslationError::from));
            match parsed {
                Ok(record) if !self.is_expired(&record) => {
                    records.insert(record.key.clone(), Arc::new(record));
                }
                Ok(_) => debug!("Skipping expired cache record {:?}", path),
                Err(e) => warn!("Ignoring unreadable cache record {:?}: {}", path, e),
            }
        }
        Ok(records.len())
    }

    fn load_plans(&self, directory: &Path) -> Result<usize, TranslationError> {
        let mut plans = self.plans.write();
        for path in json_files(directory)? {
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            match std::fs::read(&path).map(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes)) {
                Ok(Ok(value)) => {
                    plans.insert(CacheKey(stem), value);
                }
                _ => warn!("Ignoring unreadable plan {:?}", path),
            }
        }
        Ok(plans.len())
    }

    fn is_expired(&self, record: &CacheRecord) -> bool {
        match self.ttl {
            Some(ttl) => {
                let age = Utc::now().signed_duration_since(record.created_at);
                age.to_std().map(|age| age > ttl).unwrap_or(false)
            }
            None => false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look a record up; counts a hit or a miss
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheRecord>> {
        if !self.enabled {
            return None;
        }
        let found = self.peek(key);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Look a record up without touching the counters
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<CacheRecord>> {
        if !self.enabled {
            return None;
        }
        let record = self.records.read().get(key).cloned()?;
        if self.is_expired(&record) { None } else { Some(record) }
    }

    /// Store a record; the durable copy is written in the background
    ///
    /// An existing record for the key is kept: records are never replaced.
    pub fn put(&self, record: CacheRecord) -> Arc<CacheRecord> {
        let record = Arc::new(record);
        if !self.enabled {
            return record;
        }
        {
            let mut records = self.records.write();
            if let Some(existing) = records.get(&record.key) {
                if !self.is_expired(existing) {
                    return existing.clone();
                }
            }
            records.insert(record.key.clone(), record.clone());
        }
        self.writes.fetch_add(1, Ordering::Relaxed);

        if let Some(directory) = &self.directory {
            let path = directory.join(format!("{}.json", record.key));
            match serde_json::to_vec_pretty(record.as_ref()) {
                Ok(bytes) => self.persist(path, bytes),
                Err(e) => warn!("Could not serialize cache record {}: {}", record.key, e),
            }
        }
        record
    }

    fn persist(&self, path: PathBuf, bytes: Vec<u8>) {
        let handle = tokio::task::spawn_blocking(move || {
            if let Err(e) = FileManager::write_atomic(&path, &bytes) {
                warn!("Failed to write cache file {:?}: {}", path, e);
            }
        });
        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait until every background write has reached the disk
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending.lock());
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Cache write task failed: {}", e);
            }
        }
        if count > 0 {
            debug!("Flushed {} cache writes", count);
        }
    }

    pub fn get_plan(&self, key: &CacheKey) -> Option<serde_json::Value> {
        if !self.enabled {
            return None;
        }
        self.plans.read().get(key).cloned()
    }

    pub fn put_plan(&self, key: &CacheKey, plan: serde_json::Value) {
        if !self.enabled {
            return;
        }
        self.plans.write().insert(key.clone(), plan.clone());
        if let Some(directory) = &self.directory {
            let path = directory.join(PLAN_DIR).join(format!("{}.json", key));
            match serde_json::to_vec_pretty(&plan) {
                Ok(bytes) => self.persist(path, bytes),
                Err(e) => warn!("Could not serialize plan {}: {}", key, e),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

fn json_files(directory: &Path) -> Result<Vec<PathBuf>, TranslationError> {
    if !FileManager::dir_exists(directory) {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// At-most-one concurrent build per key
pub struct Singleflight<T: Clone> {
    inflight: Arc<Mutex<HashMap<String, Shared<BoxFuture<'static, T>>>>>,
}

impl<T: Clone> Default for Singleflight<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone> std::fmt::Debug for Singleflight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Singleflight")
            .field("inflight", &self.inflight.lock().len())
            .finish()
    }
}

/// Removes the leader's key once the leader is done or dropped
struct LeaderGuard<T: Clone> {
    key: String,
    inflight: Arc<Mutex<HashMap<String, Shared<BoxFuture<'static, T>>>>>,
}

impl<T: Clone> Drop for LeaderGuard<T> {
    fn drop(&mut self) {
        self.inflight.lock().remove(&self.key);
    }
}

impl<T> Singleflight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `build` unless a build for `key` is already running
    ///
    /// Returns the value and whether this caller was the one that built it.
    /// `build` is only called by the leader.
    pub async fn run<F, Fut>(&self, key: &str, build: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shared, guard) = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(shared) => (shared.clone(), None),
                None => {
                    let shared = build().boxed().shared();
                    inflight.insert(key.to_string(), shared.clone());
                    let guard = LeaderGuard {
                        key: key.to_string(),
                        inflight: self.inflight.clone(),
                    };
                    (shared, Some(guard))
                }
            }
        };
        let leader = guard.is_some();
        let value = shared.await;
        drop(guard);
        (value, leader)
    }

    /// Builds currently running
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}
