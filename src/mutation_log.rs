use crate::cache::CacheKey;
use std::collections::HashMap;

/// Structural mutation counter plus a key -> positions index, rebuilt on
/// every structural change so a completed fetch can find where its image
/// went.
#[derive(Debug, Clone, Default)]
pub struct MutationLog {
    version: u64,
    positions: HashMap<CacheKey, Vec<usize>>,
}

impl MutationLog {
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a CacheKey>) -> Self {
        let mut log = Self::default();
        log.reindex(keys);
        log
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Bumps the version once and rebuilds the index from the new order.
    pub fn record<'a>(&mut self, keys: impl IntoIterator<Item = &'a CacheKey>) {
        self.version += 1;
        self.reindex(keys);
    }

    /// Every position currently holding `key`, ascending.
    pub fn positions_of(&self, key: &CacheKey) -> &[usize] {
        self.positions.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn reindex<'a>(&mut self, keys: impl IntoIterator<Item = &'a CacheKey>) {
        self.positions.clear();
        for (position, key) in keys.into_iter().enumerate() {
            self.positions.entry(key.clone()).or_default().push(position);
        }
    }
}
