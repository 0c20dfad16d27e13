use crate::cache::{CacheKey, ImageCache};
use crate::config::FetchOptions;
use crate::error::{FetchError, TransportError};
use crate::image_item::{Decoder, ImageItem};
use crossbeam_channel::Sender;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Transport for image bytes. Called from worker threads.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, TransportError>;
}

pub struct HttpFetcher {
    client: Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(options: &FetchOptions) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .user_agent(options.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            max_bytes: options.max_image_bytes,
        })
    }

    fn fetch_file(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        let path = url
            .to_file_path()
            .map_err(|_| TransportError::File(format!("not a local path: {}", url)))?;
        let size = std::fs::metadata(&path)
            .map_err(|e| TransportError::File(e.to_string()))?
            .len();
        if size > self.max_bytes {
            return Err(TransportError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }
        std::fs::read(&path).map_err(|e| TransportError::File(e.to_string()))
    }

    fn fetch_http(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        let response = self.client.get(url.clone()).send()?.error_for_status()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        if !content_type.is_empty()
            && !content_type.starts_with("image/")
            && !content_type.starts_with("application/octet-stream")
        {
            return Err(TransportError::NotAnImage(content_type));
        }

        if let Some(size) = response.content_length() {
            if size > self.max_bytes {
                return Err(TransportError::TooLarge {
                    size,
                    max: self.max_bytes,
                });
            }
        }

        // Bodies without a content length are capped while reading.
        let mut body = Vec::new();
        response
            .take(self.max_bytes + 1)
            .read_to_end(&mut body)
            .map_err(|e| TransportError::Request(e.to_string()))?;
        if body.len() as u64 > self.max_bytes {
            return Err(TransportError::TooLarge {
                size: body.len() as u64,
                max: self.max_bytes,
            });
        }
        Ok(body)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        match url.scheme() {
            "http" | "https" => self.fetch_http(url),
            "file" => self.fetch_file(url),
            other => Err(TransportError::UnsupportedScheme(other.to_owned())),
        }
    }
}

#[derive(Debug)]
pub enum LoaderEvent {
    Loaded(ImageItem),
    Failed(CacheKey, FetchError),
}

impl LoaderEvent {
    pub fn key(&self) -> &CacheKey {
        match self {
            LoaderEvent::Loaded(item) => &item.key,
            LoaderEvent::Failed(key, _) => key,
        }
    }
}

/// Runs fetch, decode and cache population on a worker pool and reports each
/// outcome back over a channel. Never touches gallery state.
pub struct Loader {
    pool: rayon::ThreadPool,
    fetcher: Arc<dyn Fetcher>,
    decoder: Arc<dyn Decoder>,
    cache: Arc<ImageCache>,
    sender: Sender<LoaderEvent>,
}

impl Loader {
    pub fn new(
        workers: usize,
        fetcher: Arc<dyn Fetcher>,
        decoder: Arc<dyn Decoder>,
        cache: Arc<ImageCache>,
        sender: Sender<LoaderEvent>,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("gallery-fetch-{}", i))
            .build()?;

        Ok(Self {
            pool,
            fetcher,
            decoder,
            cache,
            sender,
        })
    }

    pub fn decoder(&self) -> &dyn Decoder {
        self.decoder.as_ref()
    }

    pub fn spawn(&self, key: CacheKey, url: Url) {
        let fetcher = self.fetcher.clone();
        let decoder = self.decoder.clone();
        let cache = self.cache.clone();
        let sender = self.sender.clone();

        self.pool.spawn(move || {
            let event = match load(fetcher.as_ref(), decoder.as_ref(), &key, &url) {
                Ok(item) => {
                    if let Err(err) = cache.put(item.key.clone(), item.bytes.clone()) {
                        debug!(%err, "fetched image not cached");
                    }
                    LoaderEvent::Loaded(item)
                }
                Err(err) => {
                    warn!("{}", err);
                    LoaderEvent::Failed(key, err)
                }
            };
            // The pipeline may have been dropped while we were fetching.
            let _ = sender.send(event);
        });
    }
}

fn load(
    fetcher: &dyn Fetcher,
    decoder: &dyn Decoder,
    key: &CacheKey,
    url: &Url,
) -> Result<ImageItem, FetchError> {
    let bytes = fetcher.fetch(url).map_err(|cause| FetchError::FetchFailed {
        url: url.clone(),
        cause,
    })?;
    let dimensions = decoder
        .decode(&bytes)
        .map_err(|reason| FetchError::DecodeFailed {
            url: url.clone(),
            reason,
        })?;
    Ok(ImageItem::new(key.clone(), bytes.into(), dimensions))
}
