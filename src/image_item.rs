use crate::cache::CacheKey;
use image::ImageReader;
use std::io::Cursor;
use std::sync::Arc;

/// A validated image as handed to the presentation layer: the encoded bytes
/// (what the cache stores) plus the decoded dimensions.
#[derive(Clone)]
pub struct ImageItem {
    pub key: CacheKey,
    pub bytes: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for ImageItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageItem")
            .field("key", &self.key)
            .field("bytes_len", &self.bytes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl ImageItem {
    pub fn new(key: CacheKey, bytes: Arc<[u8]>, (width, height): (u32, u32)) -> Self {
        Self {
            key,
            bytes,
            width,
            height,
        }
    }

    /// height / width, as stored in the gallery.
    pub fn aspect_ratio(&self) -> Option<f32> {
        if self.width == 0 {
            return None;
        }
        Some(self.height as f32 / self.width as f32)
    }
}

/// Turns fetched bytes into an image, or explains why they are not one.
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<(u32, u32), String>;

    /// Cheap dimension read for bytes that already passed `decode`.
    fn probe(&self, bytes: &[u8]) -> Result<(u32, u32), String> {
        self.decode(bytes)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl Decoder for ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<(u32, u32), String> {
        let mime = infer::get(bytes)
            .map(|k| k.mime_type())
            .unwrap_or("application/octet-stream");
        if !mime.starts_with("image/") {
            return Err(format!("Unsupported or mismatched format: {}", mime));
        }

        let img = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| e.to_string())?
            .decode()
            .map_err(|e| e.to_string())?;

        Ok((img.width(), img.height()))
    }

    fn probe(&self, bytes: &[u8]) -> Result<(u32, u32), String> {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| e.to_string())?
            .into_dimensions()
            .map_err(|e| e.to_string())
    }
}
