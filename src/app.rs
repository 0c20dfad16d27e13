use crate::cache::ImageCache;
use crate::config::GalleryConfig;
use crate::error::{Error, Result};
use crate::gallery::{Gallery, GalleryEntry};
use crate::image_item::{Decoder, ImageDecoder};
use crate::loader::{Fetcher, HttpFetcher};
use crate::pipeline::{FetchPipeline, Presenter, Resolution};
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// An open gallery document. A UI translates gestures into these commands
/// and renders whatever the pipeline hands its `Presenter`.
pub struct GallerySession {
    path: PathBuf,
    pipeline: FetchPipeline,
    dirty: bool,
}

impl GallerySession {
    /// A missing file opens as an empty gallery.
    pub fn open(path: impl Into<PathBuf>, config: &GalleryConfig) -> Result<Self> {
        let cache = Arc::new(ImageCache::from_options(&config.cache)?);
        let fetcher = HttpFetcher::new(&config.fetch)?;
        Self::open_with(
            path,
            cache,
            Arc::new(fetcher),
            Arc::new(ImageDecoder),
            config.fetch.worker_count(),
        )
    }

    pub fn open_with(
        path: impl Into<PathBuf>,
        cache: Arc<ImageCache>,
        fetcher: Arc<dyn Fetcher>,
        decoder: Arc<dyn Decoder>,
        workers: usize,
    ) -> Result<Self> {
        let path = path.into();
        let gallery = match fs::read(&path) {
            Ok(bytes) => Gallery::decode(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "new document");
                Gallery::new()
            }
            Err(source) => return Err(Error::Document { path, source }),
        };
        info!(?path, entries = gallery.len(), "opened gallery");

        let pipeline = FetchPipeline::new(gallery, cache, fetcher, decoder, workers)?;
        Ok(Self {
            path,
            pipeline,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn gallery(&self) -> &Gallery {
        self.pipeline.gallery()
    }

    pub fn pipeline(&mut self) -> &mut FetchPipeline {
        &mut self.pipeline
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Inserts a dropped url, appending when `position` is `None`.
    pub fn insert_url(&mut self, source: &str, position: Option<usize>) -> Result<usize> {
        let url = utils::parse_source(source)?;
        let gallery = self.pipeline.gallery_mut();
        let position = position.unwrap_or(gallery.len());
        gallery.insert(position, GalleryEntry::new(url, 0.0))?;
        self.document_changed();
        Ok(position)
    }

    pub fn remove(&mut self, position: usize) -> Result<GalleryEntry> {
        let entry = self.pipeline.gallery_mut().remove(position)?;
        self.document_changed();
        Ok(entry)
    }

    pub fn move_entry(&mut self, from: usize, to: usize) -> Result<()> {
        self.pipeline.gallery_mut().move_entry(from, to)?;
        self.document_changed();
        Ok(())
    }

    pub fn request(&mut self, position: usize) -> Result<Resolution> {
        let before = self.aspect_ratio(position);
        let resolution = self.pipeline.request(position)?;
        if self.aspect_ratio(position) != before {
            self.document_changed();
        }
        Ok(resolution)
    }

    /// Resolves every entry and waits for outstanding fetches. Returns whether
    /// everything completed before `timeout`.
    pub fn load_all(&mut self, presenter: &mut impl Presenter, timeout: Duration) -> bool {
        let before: Vec<f32> = self.gallery().aspect_ratios().collect();
        self.pipeline.request_all(presenter);
        let finished = self.pipeline.wait_idle(presenter, timeout);
        if self.gallery().aspect_ratios().ne(before) {
            self.document_changed();
        }
        finished
    }

    /// Delivers completions that arrived since the last call.
    pub fn poll(&mut self, presenter: &mut impl Presenter) -> usize {
        let before: Vec<f32> = self.gallery().aspect_ratios().collect();
        let handled = self.pipeline.poll(presenter);
        if self.gallery().aspect_ratios().ne(before) {
            self.document_changed();
        }
        handled
    }

    pub fn save(&mut self) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, self.gallery().encode())
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|source| Error::Document {
                path: self.path.clone(),
                source,
            })?;
        self.dirty = false;
        info!(path = ?self.path, entries = self.gallery().len(), "saved gallery");
        Ok(())
    }

    /// Saves pending changes and hands back the gallery.
    pub fn close(mut self) -> Result<Gallery> {
        if self.dirty {
            self.save()?;
        }
        Ok(self.pipeline.into_gallery())
    }

    fn aspect_ratio(&self, position: usize) -> Option<f32> {
        self.gallery().get(position).ok().map(|e| e.aspect_ratio)
    }

    fn document_changed(&mut self) {
        self.dirty = true;
    }
}
