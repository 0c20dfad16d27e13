use crate::cache::{CacheKey, ImageCache};
use crate::error::{FetchError, GalleryError};
use crate::gallery::Gallery;
use crate::image_item::{Decoder, ImageItem};
use crate::loader::{Fetcher, Loader, LoaderEvent};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use url::Url;

/// Receives pipeline results. Called on the thread that owns the pipeline.
pub trait Presenter {
    fn on_image_ready(&mut self, position: usize, image: &ImageItem);
    fn on_image_failed(&mut self, position: usize, reason: &FetchError);
}

/// An outstanding request for the image at `position`, stamped with the
/// gallery's mutation version at issue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub target_key: CacheKey,
    pub source: Url,
    pub position: usize,
    pub issued_at_version: u64,
}

#[derive(Debug)]
pub enum Resolution {
    Ready(ImageItem),
    Pending(FetchRequest),
}

/// Owns the gallery and decides, per position, between a cached image and a
/// background fetch. Completed fetches are reconciled against the gallery as
/// it is when they are drained, not as it was when they were issued.
pub struct FetchPipeline {
    gallery: Gallery,
    cache: Arc<ImageCache>,
    loader: Loader,
    events: Receiver<LoaderEvent>,
    in_flight: HashMap<CacheKey, Vec<FetchRequest>>,
}

impl FetchPipeline {
    pub fn new(
        gallery: Gallery,
        cache: Arc<ImageCache>,
        fetcher: Arc<dyn Fetcher>,
        decoder: Arc<dyn Decoder>,
        workers: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let (sender, events) = crossbeam_channel::unbounded();
        let loader = Loader::new(workers, fetcher, decoder, cache.clone(), sender)?;
        Ok(Self {
            gallery,
            cache,
            loader,
            events,
            in_flight: HashMap::new(),
        })
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn gallery_mut(&mut self) -> &mut Gallery {
        &mut self.gallery
    }

    pub fn into_gallery(self) -> Gallery {
        self.gallery
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Number of distinct keys with a transport call outstanding.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn request(&mut self, position: usize) -> Result<Resolution, GalleryError> {
        let entry = self.gallery.get(position)?;
        let key = entry.key().clone();
        let source = entry.source.clone();

        if let Some(bytes) = self.cache.get(&key) {
            match self.loader.decoder().probe(&bytes) {
                Ok(dimensions) => {
                    trace!(%key, position, "cache hit");
                    let image = ImageItem::new(key, bytes, dimensions);
                    self.fill_aspect_ratio(position, &image);
                    return Ok(Resolution::Ready(image));
                }
                Err(reason) => {
                    debug!(%key, %reason, "discarding unreadable cache entry");
                    self.cache.remove(&key);
                }
            }
        }

        let request = FetchRequest {
            target_key: key.clone(),
            source: source.clone(),
            position,
            issued_at_version: self.gallery.version(),
        };

        match self.in_flight.entry(key) {
            Entry::Occupied(mut waiting) => {
                debug!(key = %waiting.key(), position, "joining in-flight fetch");
                waiting.get_mut().push(request.clone());
            }
            Entry::Vacant(slot) => {
                debug!(key = %slot.key(), position, "fetching");
                self.loader.spawn(slot.key().clone(), source);
                slot.insert(vec![request.clone()]);
            }
        }

        Ok(Resolution::Pending(request))
    }

    /// Requests every position, returning how many were served from cache.
    pub fn request_all(&mut self, presenter: &mut impl Presenter) -> usize {
        let mut ready = 0;
        for position in 0..self.gallery.len() {
            if let Ok(Resolution::Ready(image)) = self.request(position) {
                presenter.on_image_ready(position, &image);
                ready += 1;
            }
        }
        ready
    }

    /// Delivers every completion already received without blocking.
    pub fn poll(&mut self, presenter: &mut impl Presenter) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.complete(event, presenter);
            handled += 1;
        }
        handled
    }

    /// Blocks up to `timeout` for at least one completion, then drains the rest.
    pub fn wait(&mut self, presenter: &mut impl Presenter, timeout: Duration) -> usize {
        if self.is_idle() {
            return self.poll(presenter);
        }
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.complete(event, presenter);
                1 + self.poll(presenter)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Keeps delivering until nothing is in flight or `timeout` elapses.
    /// Returns whether the pipeline went idle.
    pub fn wait_idle(&mut self, presenter: &mut impl Presenter, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.wait(presenter, remaining);
        }
        true
    }

    fn complete(&mut self, event: LoaderEvent, presenter: &mut impl Presenter) {
        let Some(requests) = self.in_flight.remove(event.key()) else {
            debug!(key = %event.key(), "completion with no waiting request");
            return;
        };

        let mut positions: Vec<usize> = Vec::with_capacity(requests.len());
        for request in &requests {
            let targets = self.reconcile(request);
            if targets.is_empty() {
                debug!(
                    key = %request.target_key,
                    position = request.position,
                    "image no longer in gallery, discarding"
                );
            }
            for position in targets {
                if !positions.contains(&position) {
                    positions.push(position);
                }
            }
        }

        match &event {
            LoaderEvent::Loaded(image) => {
                for position in positions {
                    self.fill_aspect_ratio(position, image);
                    presenter.on_image_ready(position, image);
                }
            }
            LoaderEvent::Failed(_, err) => {
                for position in positions {
                    presenter.on_image_failed(position, err);
                }
            }
        }
    }

    /// Where the result for `request` belongs now. After a structural change
    /// every entry still holding the key receives it.
    fn reconcile(&self, request: &FetchRequest) -> Vec<usize> {
        if self.gallery.version() == request.issued_at_version {
            return vec![request.position];
        }

        let positions = self.gallery.log().positions_of(&request.target_key);
        if !positions.is_empty() && positions != [request.position] {
            debug!(
                key = %request.target_key,
                from = request.position,
                to = ?positions,
                "gallery changed while fetching, redirecting"
            );
        }
        positions.to_vec()
    }

    fn fill_aspect_ratio(&mut self, position: usize, image: &ImageItem) {
        if let Some(ratio) = image.aspect_ratio() {
            let _ = self.gallery.set_aspect_ratio(position, ratio);
        }
    }
}
