use crate::cache::CacheKey;
use crate::error::{DecodeError, GalleryError};
use crate::mutation_log::MutationLog;
use serde::{Deserialize, Serialize};
use url::Url;

/// One image reference. `aspect_ratio` is height / width, `0.0` until known.
/// Persisted ratios are always finite and non-negative.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub source: Url,
    pub aspect_ratio: f32,
    key: CacheKey,
}

impl GalleryEntry {
    /// An unusable ratio is stored as unknown.
    pub fn new(source: Url, aspect_ratio: f32) -> Self {
        let key = CacheKey::from(&source);
        Self {
            source,
            aspect_ratio: if is_valid_ratio(aspect_ratio) { aspect_ratio } else { 0.0 },
            key,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

fn is_valid_ratio(ratio: f32) -> bool {
    ratio.is_finite() && ratio >= 0.0
}

/// Persisted form: two parallel sequences. Older documents used the
/// `imageURLs` / `imageAspectRatios` keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryRecord {
    #[serde(alias = "imageURLs")]
    pub urls: Vec<String>,
    #[serde(alias = "imageAspectRatios")]
    pub aspect_ratios: Vec<f32>,
}

/// Ordered image references. Position is the only identity; every structural
/// change goes through `insert`, `remove` or `move_entry` so the mutation log
/// stays in lockstep.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    log: MutationLog,
}

impl PartialEq for Gallery {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        let log = MutationLog::new(entries.iter().map(GalleryEntry::key));
        Self { entries, log }
    }

    /// A blank document is an empty gallery.
    pub fn decode(bytes: &[u8]) -> Result<Self, GalleryError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }
        let record: GalleryRecord = serde_json::from_slice(bytes).map_err(DecodeError::from)?;
        Self::from_record(record)
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_record()).unwrap_or_default()
    }

    pub fn from_record(record: GalleryRecord) -> Result<Self, GalleryError> {
        if record.urls.len() != record.aspect_ratios.len() {
            return Err(DecodeError::LengthMismatch {
                urls: record.urls.len(),
                aspect_ratios: record.aspect_ratios.len(),
            }
            .into());
        }

        let entries = record
            .urls
            .into_iter()
            .zip(record.aspect_ratios)
            .enumerate()
            .map(|(position, (url, ratio))| {
                if !is_valid_ratio(ratio) {
                    return Err(DecodeError::InvalidAspectRatio {
                        position,
                        value: ratio,
                    });
                }
                let source = Url::parse(&url).map_err(|source| DecodeError::InvalidUrl {
                    position,
                    url,
                    source,
                })?;
                Ok(GalleryEntry::new(source, ratio))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_entries(entries))
    }

    pub fn to_record(&self) -> GalleryRecord {
        GalleryRecord {
            urls: self.urls().map(|u| u.as_str().to_owned()).collect(),
            aspect_ratios: self
                .aspect_ratios()
                .map(|r| if is_valid_ratio(r) { r } else { 0.0 })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.log.version()
    }

    pub fn log(&self) -> &MutationLog {
        &self.log
    }

    pub fn get(&self, position: usize) -> Result<&GalleryEntry, GalleryError> {
        self.entries
            .get(position)
            .ok_or(GalleryError::IndexOutOfRange {
                position,
                len: self.entries.len(),
            })
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn urls(&self) -> impl Iterator<Item = &Url> + '_ {
        self.entries.iter().map(|e| &e.source)
    }

    pub fn aspect_ratios(&self) -> impl Iterator<Item = f32> + '_ {
        self.entries.iter().map(|e| e.aspect_ratio)
    }

    /// `position == len()` appends.
    pub fn insert(&mut self, position: usize, entry: GalleryEntry) -> Result<(), GalleryError> {
        if position > self.entries.len() {
            return Err(self.out_of_range(position));
        }
        self.entries.insert(position, entry);
        self.record_mutation();
        Ok(())
    }

    pub fn push(&mut self, entry: GalleryEntry) {
        self.entries.push(entry);
        self.record_mutation();
    }

    pub fn remove(&mut self, position: usize) -> Result<GalleryEntry, GalleryError> {
        if position >= self.entries.len() {
            return Err(self.out_of_range(position));
        }
        let entry = self.entries.remove(position);
        self.record_mutation();
        Ok(entry)
    }

    /// Removes the entry at `from` and reinserts it so it ends up at `to`.
    pub fn move_entry(&mut self, from: usize, to: usize) -> Result<(), GalleryError> {
        let len = self.entries.len();
        if from >= len {
            return Err(self.out_of_range(from));
        }
        if to >= len {
            return Err(self.out_of_range(to));
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        self.record_mutation();
        Ok(())
    }

    /// Content-only update, leaves the mutation version alone. NaN, infinite
    /// and negative ratios are rejected and the entry is left as it was.
    pub fn set_aspect_ratio(&mut self, position: usize, ratio: f32) -> Result<(), GalleryError> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(position)
            .ok_or(GalleryError::IndexOutOfRange { position, len })?;
        if !is_valid_ratio(ratio) {
            return Err(GalleryError::InvalidAspectRatio {
                position,
                value: ratio,
            });
        }
        entry.aspect_ratio = ratio;
        Ok(())
    }

    pub fn key_at(&self, position: usize) -> Option<&CacheKey> {
        self.entries.get(position).map(GalleryEntry::key)
    }

    fn record_mutation(&mut self) {
        self.log.record(self.entries.iter().map(GalleryEntry::key));
    }

    fn out_of_range(&self, position: usize) -> GalleryError {
        GalleryError::IndexOutOfRange {
            position,
            len: self.entries.len(),
        }
    }
}
