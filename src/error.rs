use crate::cache::CacheKey;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error for hosts driving a gallery session.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Gallery(#[from] GalleryError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to start fetch workers: {0}")]
    Workers(#[from] rayon::ThreadPoolBuildError),

    #[error("invalid image url: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to set up image transport: {0}")]
    Transport(#[from] TransportError),

    #[error("document i/o failed for {path:?}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("malformed gallery record: {0}")]
    Decode(#[from] DecodeError),

    #[error("position {position} is out of range for a gallery of {len} entries")]
    IndexOutOfRange { position: usize, len: usize },

    #[error("aspect ratio {value} for position {position} is not a finite non-negative number")]
    InvalidAspectRatio { position: usize, value: f32 },
}

/// Why a persisted record could not be turned into a gallery.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{urls} urls but {aspect_ratios} aspect ratios")]
    LengthMismatch { urls: usize, aspect_ratios: usize },

    #[error("entry {position} has an invalid url {url:?}: {source}")]
    InvalidUrl {
        position: usize,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("entry {position} has an invalid aspect ratio {value}")]
    InvalidAspectRatio { position: usize, value: f32 },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{size} bytes for {key} exceeds the {budget} byte memory budget")]
    EntryTooLarge {
        key: CacheKey,
        size: usize,
        budget: usize,
    },

    #[error("cache storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of the fetch capability.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("server answered HTTP {0}")]
    Status(u16),

    #[error("content type {0:?} is not an image")]
    NotAnImage(String),

    #[error("body of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("unsupported url scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("failed to read local file: {0}")]
    File(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => TransportError::Status(status.as_u16()),
            None => TransportError::Request(err.to_string()),
        }
    }
}

/// Per-entry failure delivered to the presentation layer.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("failed to fetch {url}: {cause}")]
    FetchFailed {
        url: Url,
        #[source]
        cause: TransportError,
    },

    #[error("{url} is not a decodable image: {reason}")]
    DecodeFailed { url: Url, reason: String },
}

impl FetchError {
    pub fn url(&self) -> &Url {
        match self {
            FetchError::FetchFailed { url, .. } | FetchError::DecodeFailed { url, .. } => url,
        }
    }
}
