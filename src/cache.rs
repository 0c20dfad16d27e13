use crate::config::CacheOptions;
use crate::disk_cache::DiskCache;
use crate::error::CacheError;
use lru::LruCache;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};
use url::{Position, Url};

/// Canonical form of an image url, used as the cache lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Url> for CacheKey {
    fn from(url: &Url) -> Self {
        ImageCache::normalize(url)
    }
}

struct MemoryTier {
    entries: LruCache<CacheKey, Arc<[u8]>>,
    bytes: usize,
    max_bytes: usize,
}

impl MemoryTier {
    fn new(max_bytes: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
            max_bytes,
        }
    }

    fn insert(&mut self, key: CacheKey, data: Arc<[u8]>) -> Result<(), CacheError> {
        let size = data.len();
        if size > self.max_bytes {
            return Err(CacheError::EntryTooLarge {
                key,
                size,
                budget: self.max_bytes,
            });
        }

        if let Some(existing) = self.entries.put(key, data) {
            self.bytes = self.bytes.saturating_sub(existing.len());
        }
        self.bytes = self.bytes.saturating_add(size);

        while self.bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((evicted, data)) => {
                    trace!(key = %evicted, size = data.len(), "evicted from memory tier");
                    self.bytes = self.bytes.saturating_sub(data.len());
                }
                None => break,
            }
        }
        Ok(())
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some(data) = self.entries.pop(key) {
            self.bytes = self.bytes.saturating_sub(data.len());
        }
    }
}

/// Shared image byte cache: a small volatile memory tier in front of an
/// optional persistent disk tier. Both tiers evict least recently used first.
pub struct ImageCache {
    memory: Mutex<MemoryTier>,
    disk: Option<Mutex<DiskCache>>,
}

impl ImageCache {
    pub fn in_memory(memory_capacity: usize) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new(memory_capacity)),
            disk: None,
        }
    }

    pub fn with_disk(memory_capacity: usize, disk: DiskCache) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new(memory_capacity)),
            disk: Some(Mutex::new(disk)),
        }
    }

    pub fn from_options(options: &CacheOptions) -> Result<Self, CacheError> {
        let memory_capacity = options.memory_budget();
        if !options.persistent {
            return Ok(Self::in_memory(memory_capacity));
        }
        let disk = DiskCache::open(options.disk_dir(), options.disk_capacity)?;
        Ok(Self::with_disk(memory_capacity, disk))
    }

    /// Case-folds the host, drops the fragment, default port and trailing
    /// slashes of the path. Scheme and query are kept.
    pub fn normalize(url: &Url) -> CacheKey {
        let mut canonical = url.clone();
        canonical.set_fragment(None);
        if let Some(host) = url.host_str() {
            let folded = host.to_ascii_lowercase();
            if folded != host {
                let _ = canonical.set_host(Some(&folded));
            }
        }

        let mut key = canonical[..Position::BeforePath].to_owned();
        key.push_str(canonical.path().trim_end_matches('/'));
        if let Some(query) = canonical.query() {
            key.push('?');
            key.push_str(query);
        }
        CacheKey(key)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<[u8]>> {
        if let Some(data) = self.memory().entries.get(key) {
            return Some(data.clone());
        }

        let disk = self.disk.as_ref()?;
        let data = lock(disk).read(key)?;
        let mut memory = self.memory();
        if let Some(current) = memory.entries.get(key) {
            // a put landed while the disk tier was read
            return Some(current.clone());
        }
        debug!(%key, size = data.len(), "promoting from disk tier");
        if let Err(err) = memory.insert(key.clone(), data.clone()) {
            debug!(%err, "disk hit not promoted");
        }
        Some(data)
    }

    /// Inserts or replaces `key`. Rejected without touching either tier when
    /// the entry alone exceeds the memory budget, so such an image is not
    /// persisted either and is fetched again on every request.
    pub fn put(&self, key: CacheKey, data: Arc<[u8]>) -> Result<(), CacheError> {
        self.memory().insert(key.clone(), data.clone())?;

        if let Some(disk) = &self.disk {
            if let Err(err) = lock(disk).write(&key, &data) {
                warn!(%key, %err, "failed to persist cache entry");
            }
        }
        Ok(())
    }

    pub fn remove(&self, key: &CacheKey) {
        self.memory().remove(key);
        if let Some(disk) = &self.disk {
            lock(disk).remove(key);
        }
    }

    pub fn contains_in_memory(&self, key: &CacheKey) -> bool {
        self.memory().entries.contains(key)
    }

    pub fn memory_usage(&self) -> usize {
        self.memory().bytes
    }

    pub fn memory_budget(&self) -> usize {
        self.memory().max_bytes
    }

    pub fn len_in_memory(&self) -> usize {
        self.memory().entries.len()
    }

    fn memory(&self) -> MutexGuard<'_, MemoryTier> {
        lock(&self.memory)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
