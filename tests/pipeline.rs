use crossbeam_channel::{Receiver, Sender};
use image_gallery::{
    CacheKey, FetchError, FetchPipeline, Fetcher, Gallery, GalleryEntry, ImageCache, ImageDecoder,
    ImageItem, Presenter, Resolution, TransportError,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Serves canned bodies, but only after the test releases the gate for
/// that url.
struct GatedFetcher {
    bodies: HashMap<String, Result<Vec<u8>, TransportError>>,
    gates: Mutex<HashMap<String, Receiver<()>>>,
    calls: AtomicUsize,
}

impl GatedFetcher {
    fn new() -> Self {
        Self {
            bodies: HashMap::new(),
            gates: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn serve(mut self, url: &str, body: Result<Vec<u8>, TransportError>) -> (Self, Sender<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.bodies.insert(url.to_owned(), body);
        self.gates.lock().unwrap().insert(url.to_owned(), rx);
        (self, tx)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for GatedFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().unwrap().get(url.as_str()).cloned();
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(TIMEOUT);
        }
        self.bodies
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| Err(TransportError::Status(404)))
    }
}

#[derive(Default)]
struct Recorder {
    ready: Vec<(usize, u32, u32)>,
    failed: Vec<(usize, String)>,
}

impl Presenter for Recorder {
    fn on_image_ready(&mut self, position: usize, image: &ImageItem) {
        self.ready.push((position, image.width, image.height));
    }

    fn on_image_failed(&mut self, position: usize, reason: &FetchError) {
        self.failed.push((position, reason.to_string()));
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::ImageBuffer::from_pixel(width, height, image::Rgba([200u8, 100, 50, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn url(name: &str) -> String {
    format!("https://img.example/{}.png", name)
}

fn gallery(names: &[&str]) -> Gallery {
    Gallery::from_entries(
        names
            .iter()
            .map(|n| GalleryEntry::new(Url::parse(&url(n)).unwrap(), 0.0))
            .collect(),
    )
}

fn pipeline(names: &[&str], fetcher: Arc<GatedFetcher>, workers: usize) -> FetchPipeline {
    FetchPipeline::new(
        gallery(names),
        Arc::new(ImageCache::in_memory(1 << 20)),
        fetcher,
        Arc::new(ImageDecoder),
        workers,
    )
    .unwrap()
}

fn key(name: &str) -> CacheKey {
    CacheKey::from(&Url::parse(&url(name)).unwrap())
}

#[test]
fn delivers_to_new_position_after_move() {
    let (fetcher, release) = GatedFetcher::new().serve(&url("b"), Ok(png(10, 20)));
    let fetcher = Arc::new(fetcher);
    let mut p = pipeline(&["a", "b", "c"], fetcher.clone(), 2);
    let mut recorder = Recorder::default();

    assert!(matches!(p.request(1).unwrap(), Resolution::Pending(_)));
    p.gallery_mut().move_entry(1, 0).unwrap();
    release.send(()).unwrap();

    assert!(p.wait_idle(&mut recorder, TIMEOUT));
    assert_eq!(recorder.ready, [(0, 10, 20)]);
    assert_eq!(p.gallery().get(0).unwrap().aspect_ratio, 2.0);
    assert_eq!(p.gallery().get(1).unwrap().aspect_ratio, 0.0);
}

#[test]
fn delivers_in_place_when_unchanged() {
    let (fetcher, release) = GatedFetcher::new().serve(&url("b"), Ok(png(8, 6)));
    let mut p = pipeline(&["a", "b", "c"], Arc::new(fetcher), 1);
    let mut recorder = Recorder::default();

    p.request(1).unwrap();
    // content-only updates do not count as reordering
    p.gallery_mut().set_aspect_ratio(2, 1.0).unwrap();
    release.send(()).unwrap();

    assert!(p.wait_idle(&mut recorder, TIMEOUT));
    assert_eq!(recorder.ready, [(1, 8, 6)]);
}

#[test]
fn delivers_in_place_when_other_entries_change() {
    let (fetcher, release) = GatedFetcher::new().serve(&url("b"), Ok(png(8, 8)));
    let mut p = pipeline(&["a", "b", "c"], Arc::new(fetcher), 1);
    let mut recorder = Recorder::default();

    p.request(1).unwrap();
    p.gallery_mut().remove(2).unwrap();
    release.send(()).unwrap();

    assert!(p.wait_idle(&mut recorder, TIMEOUT));
    assert_eq!(recorder.ready, [(1, 8, 8)]);
}

#[test]
fn concurrent_requests_share_one_transport_call() {
    let (fetcher, release) = GatedFetcher::new().serve(&url("a"), Ok(png(4, 4)));
    let fetcher = Arc::new(fetcher);
    let mut p = pipeline(&["a", "b"], fetcher.clone(), 4);
    let mut recorder = Recorder::default();

    assert!(matches!(p.request(0).unwrap(), Resolution::Pending(_)));
    assert!(matches!(p.request(0).unwrap(), Resolution::Pending(_)));
    assert_eq!(p.pending(), 1);
    assert!(p.is_pending(&key("a")));

    release.send(()).unwrap();
    assert!(p.wait_idle(&mut recorder, TIMEOUT));

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(recorder.ready, [(0, 4, 4)]);

    // completed: later requests are cache hits, still one transport call
    assert!(matches!(p.request(0).unwrap(), Resolution::Ready(_)));
    assert_eq!(fetcher.calls(), 1);
}

#[test]
fn duplicate_entries_each_receive_the_image() {
    let (fetcher, release) = GatedFetcher::new().serve(&url("a"), Ok(png(4, 2)));
    let fetcher = Arc::new(fetcher);
    let mut p = pipeline(&["a", "b", "a"], fetcher.clone(), 2);
    let mut recorder = Recorder::default();

    p.request(0).unwrap();
    p.request(2).unwrap();
    release.send(()).unwrap();

    assert!(p.wait_idle(&mut recorder, TIMEOUT));
    assert_eq!(fetcher.calls(), 1);
    recorder.ready.sort();
    assert_eq!(recorder.ready, [(0, 4, 2), (2, 4, 2)]);
}

#[test]
fn duplicate_inserted_ahead_does_not_steal_delivery() {
    let (fetcher, release) = GatedFetcher::new().serve(&url("b"), Ok(png(5, 5)));
    let mut p = pipeline(&["a", "b", "c"], Arc::new(fetcher), 1);
    let mut recorder = Recorder::default();

    p.request(1).unwrap();
    // [a, b, c] -> [b, a, b, c]: the waiting entry is now at 2
    let copy = p.gallery().get(1).unwrap().clone();
    p.gallery_mut().insert(0, copy).unwrap();
    release.send(()).unwrap();

    assert!(p.wait_idle(&mut recorder, TIMEOUT));
    recorder.ready.sort();
    assert_eq!(recorder.ready, [(0, 5, 5), (2, 5, 5)]);
}

#[test]
fn removed_target_is_cached_but_not_delivered() {
    let (fetcher, release) = GatedFetcher::new().serve(&url("b"), Ok(png(6, 3)));
    let mut p = pipeline(&["a", "b", "c"], Arc::new(fetcher), 1);
    let mut recorder = Recorder::default();

    p.request(1).unwrap();
    let removed = p.gallery_mut().remove(1).unwrap();
    assert_eq!(removed.key(), &key("b"));
    release.send(()).unwrap();

    assert!(p.wait_idle(&mut recorder, TIMEOUT));
    assert!(recorder.ready.is_empty());
    assert!(recorder.failed.is_empty());
    assert!(p.cache().get(&key("b")).is_some());
    assert_eq!(p.gallery().get(1).unwrap().aspect_ratio, 0.0);
}

#[test]
fn readded_image_is_a_cache_hit() {
    let (fetcher, release) = GatedFetcher::new().serve(&url("b"), Ok(png(6, 3)));
    let fetcher = Arc::new(fetcher);
    let mut p = pipeline(&["a", "b"], fetcher.clone(), 1);
    let mut recorder = Recorder::default();

    p.request(1).unwrap();
    let removed = p.gallery_mut().remove(1).unwrap();
    release.send(()).unwrap();
    assert!(p.wait_idle(&mut recorder, TIMEOUT));

    p.gallery_mut().insert(0, removed).unwrap();
    match p.request(0).unwrap() {
        Resolution::Ready(image) => assert_eq!((image.width, image.height), (6, 3)),
        other => panic!("expected cache hit, got {:?}", other),
    }
    assert_eq!(fetcher.calls(), 1);
}

#[test]
fn completions_in_any_order_reconcile_independently() {
    let fetcher = GatedFetcher::new();
    let (fetcher, release_a) = fetcher.serve(&url("a"), Ok(png(2, 4)));
    let (fetcher, release_c) = fetcher.serve(&url("c"), Ok(png(4, 2)));
    let mut p = pipeline(&["a", "b", "c"], Arc::new(fetcher), 2);
    let mut recorder = Recorder::default();

    p.request(0).unwrap();
    p.request(2).unwrap();
    // [a, b, c] -> [c, a, b]
    p.gallery_mut().move_entry(2, 0).unwrap();

    release_c.send(()).unwrap();
    assert_eq!(p.wait(&mut recorder, TIMEOUT), 1);
    assert_eq!(recorder.ready, [(0, 4, 2)]);

    // [c, a, b] -> [c, b, a]
    p.gallery_mut().move_entry(1, 2).unwrap();
    release_a.send(()).unwrap();
    assert!(p.wait_idle(&mut recorder, TIMEOUT));
    assert_eq!(recorder.ready, [(0, 4, 2), (2, 2, 4)]);
}

#[test]
fn transport_failure_follows_moved_entry() {
    let (fetcher, release) =
        GatedFetcher::new().serve(&url("b"), Err(TransportError::Status(503)));
    let fetcher = Arc::new(fetcher);
    let mut p = pipeline(&["a", "b"], fetcher.clone(), 1);
    let mut recorder = Recorder::default();

    p.request(1).unwrap();
    p.gallery_mut().move_entry(1, 0).unwrap();
    release.send(()).unwrap();

    assert!(p.wait_idle(&mut recorder, TIMEOUT));
    assert!(recorder.ready.is_empty());
    assert_eq!(recorder.failed.len(), 1);
    assert_eq!(recorder.failed[0].0, 0);
    assert!(recorder.failed[0].1.contains("503"));
    assert!(p.cache().get(&key("b")).is_none());
}

#[test]
fn undecodable_body_reports_decode_failure() {
    let (fetcher, release) =
        GatedFetcher::new().serve(&url("a"), Ok(b"<html>rate limited</html>".to_vec()));
    let mut p = pipeline(&["a"], Arc::new(fetcher), 1);
    let mut recorder = Recorder::default();

    p.request(0).unwrap();
    release.send(()).unwrap();

    assert!(p.wait_idle(&mut recorder, TIMEOUT));
    assert_eq!(recorder.failed.len(), 1);
    assert!(recorder.failed[0].1.contains("not a decodable image"));
    assert!(p.cache().get(&key("a")).is_none());
}

#[test]
fn request_all_serves_hits_and_fetches_misses() {
    let (fetcher, release) = GatedFetcher::new().serve(&url("b"), Ok(png(3, 3)));
    let fetcher = Arc::new(fetcher);
    let mut p = pipeline(&["a", "b"], fetcher.clone(), 1);
    p.cache().put(key("a"), png(5, 10).into()).unwrap();
    let mut recorder = Recorder::default();

    assert_eq!(p.request_all(&mut recorder), 1);
    assert_eq!(recorder.ready, [(0, 5, 10)]);
    release.send(()).unwrap();

    assert!(p.wait_idle(&mut recorder, TIMEOUT));
    assert_eq!(recorder.ready, [(0, 5, 10), (1, 3, 3)]);
    assert_eq!(fetcher.calls(), 1);
    let ratios: Vec<f32> = p.gallery().aspect_ratios().collect();
    assert_eq!(ratios, [2.0, 1.0]);
}
