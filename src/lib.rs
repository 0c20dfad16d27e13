pub mod app;
pub mod cache;
pub mod config;
pub mod disk_cache;
pub mod error;
pub mod gallery;
pub mod image_item;
pub mod loader;
pub mod mutation_log;
pub mod pipeline;
pub mod utils;

pub use app::GallerySession;
pub use cache::{CacheKey, ImageCache};
pub use config::GalleryConfig;
pub use disk_cache::DiskCache;
pub use error::{
    CacheError, DecodeError, Error, FetchError, GalleryError, Result, TransportError,
};
pub use gallery::{Gallery, GalleryEntry, GalleryRecord};
pub use image_item::{Decoder, ImageDecoder, ImageItem};
pub use loader::{Fetcher, HttpFetcher, Loader, LoaderEvent};
pub use mutation_log::MutationLog;
pub use pipeline::{FetchPipeline, FetchRequest, Presenter, Resolution};
