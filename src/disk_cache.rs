use crate::cache::CacheKey;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

const ENTRY_EXTENSION: &str = "img";

/// Persistent cache tier: one file per entry, named by the SHA-256 of the
/// canonical key. LRU order survives restarts through file modification times.
pub struct DiskCache {
    dir: PathBuf,
    index: LruCache<String, u64>,
    bytes: u64,
    max_bytes: u64,
}

impl DiskCache {
    pub fn open(dir: PathBuf, max_bytes: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;

        let mut found: Vec<(SystemTime, String, u64)> = WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == ENTRY_EXTENSION))
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                let name = e.file_name().to_str()?.to_owned();
                Some((modified, name, meta.len()))
            })
            .collect();

        // Oldest first so the most recently used file ends up most recent.
        found.sort();

        let mut cache = Self {
            dir,
            index: LruCache::unbounded(),
            bytes: 0,
            max_bytes,
        };
        for (_, name, size) in found {
            cache.index.put(name, size);
            cache.bytes += size;
        }
        debug!(
            dir = ?cache.dir,
            entries = cache.index.len(),
            bytes = cache.bytes,
            "opened disk cache"
        );
        cache.evict_to_budget();
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn usage(&self) -> u64 {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.contains(&file_name(key))
    }

    pub fn read(&mut self, key: &CacheKey) -> Option<Arc<[u8]>> {
        let name = file_name(key);
        self.index.get(&name)?;

        let path = self.dir.join(&name);
        match fs::read(&path) {
            Ok(data) => {
                touch(&path);
                Some(data.into())
            }
            Err(err) => {
                warn!(%key, %err, "dropping unreadable disk cache entry");
                self.forget(&name);
                None
            }
        }
    }

    /// Entries larger than the whole tier are skipped.
    pub fn write(&mut self, key: &CacheKey, data: &[u8]) -> io::Result<()> {
        let size = data.len() as u64;
        if size > self.max_bytes {
            debug!(%key, size, budget = self.max_bytes, "too large for disk tier");
            return Ok(());
        }

        let name = file_name(key);
        let path = self.dir.join(&name);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;

        if let Some(previous) = self.index.put(name, size) {
            self.bytes = self.bytes.saturating_sub(previous);
        }
        self.bytes += size;
        self.evict_to_budget();
        Ok(())
    }

    pub fn remove(&mut self, key: &CacheKey) {
        let name = file_name(key);
        if self.index.contains(&name) {
            self.delete(&name);
        }
    }

    fn evict_to_budget(&mut self) {
        while self.bytes > self.max_bytes {
            let Some((name, _)) = self.index.peek_lru() else {
                break;
            };
            let name = name.clone();
            trace!(file = %name, "evicted from disk tier");
            self.delete(&name);
        }
    }

    fn delete(&mut self, name: &str) {
        if let Err(err) = fs::remove_file(self.dir.join(name)) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(file = %name, %err, "failed to delete disk cache entry");
            }
        }
        self.forget(name);
    }

    fn forget(&mut self, name: &str) {
        if let Some(size) = self.index.pop(name) {
            self.bytes = self.bytes.saturating_sub(size);
        }
    }
}

fn file_name(key: &CacheKey) -> String {
    let digest = Sha256::digest(key.as_str().as_bytes());
    format!("{:x}.{}", digest, ENTRY_EXTENSION)
}

fn touch(path: &Path) {
    if let Ok(file) = fs::File::options().write(true).open(path) {
        let _ = file.set_modified(SystemTime::now());
    }
}
