//! Bitmap decoding for pasted images.
//!
//! Image events carry their bitmap as a `data:` URL. Decoding is the only
//! expensive step of a replay, so [`ImageCache`] memoizes the result per
//! distinct reference. Failures are memoized too: a reference that cannot be
//! decoded is warned about once and skipped on every later replay.
//!
//! A decoded bitmap costs `4 * width * height` bytes, so the cache keeps only
//! the [`MAX_CACHED_IMAGES`](crate::consts::MAX_CACHED_IMAGES) most recently painted references. An evicted
//! reference is decoded again the next time a replay reaches it.

#[cfg(test)]
#[path = "image_test.rs"]
mod image_test;

use std::collections::{HashMap, VecDeque};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use frames::ErrorCode;

use crate::consts::{DATA_URL_PREFIX, MAX_CACHED_IMAGES};

/// Decoded RGBA8 pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("image reference is not a data URL")]
    NotDataUrl,
    #[error("data URL payload is not base64")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported or corrupt image: {0}")]
    Image(#[from] ::image::ImageError),
}

impl ErrorCode for DecodeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotDataUrl | Self::NotBase64 => "E_IMAGE_REFERENCE",
            Self::Base64(_) | Self::Image(_) => "E_IMAGE_DECODE",
        }
    }
}

/// Decode a `data:<mime>;base64,<payload>` URL into RGBA pixels.
///
/// # Errors
///
/// Fails if the reference is not a base64 data URL or the payload is not an
/// image format the `image` crate recognizes.
pub fn decode_data_url(reference: &str) -> Result<Bitmap, DecodeError> {
    let rest = reference.strip_prefix(DATA_URL_PREFIX).ok_or(DecodeError::NotDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(DecodeError::NotDataUrl)?;
    if !header.ends_with(";base64") {
        return Err(DecodeError::NotBase64);
    }

    let bytes = STANDARD.decode(payload.trim())?;
    let rgba = ::image::load_from_memory(&bytes)?.to_rgba8();
    Ok(Bitmap { width: rgba.width(), height: rgba.height(), rgba: rgba.into_raw() })
}

// =============================================================================
// RECENT CACHE
// =============================================================================

/// Reference-keyed map that holds at most `capacity` entries, evicting the
/// least recently used one on overflow.
#[derive(Debug)]
pub struct RecentCache<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
    capacity: usize,
}

impl<V> RecentCache<V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), order: VecDeque::new(), capacity: capacity.max(1) }
    }

    /// Mark `key` as most recently used. Returns `false` if it is not cached.
    pub fn touch(&mut self, key: &str) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }
        if let Some(at) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(at) {
                self.order.push_back(k);
            }
        }
        true
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or replace `key` as the most recent entry.
    pub fn insert(&mut self, key: String, value: V) {
        if self.entries.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// IMAGE CACHE
// =============================================================================

/// Memoized reference → bitmap lookups.
#[derive(Debug)]
pub struct ImageCache {
    entries: RecentCache<Option<Bitmap>>,
    decodes: usize,
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::with_capacity(MAX_CACHED_IMAGES)
    }
}

impl ImageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: RecentCache::new(capacity), decodes: 0 }
    }

    /// Return the bitmap for `reference`, decoding it on first sight.
    /// `None` means the reference is known to be undecodable.
    pub fn get_or_decode(&mut self, reference: &str) -> Option<&Bitmap> {
        if !self.entries.touch(reference) {
            self.decodes += 1;
            let decoded = match decode_data_url(reference) {
                Ok(bitmap) => Some(bitmap),
                Err(e) => {
                    tracing::warn!(error = %e, code = e.error_code(), "skipping undecodable image");
                    None
                }
            };
            self.entries.insert(reference.to_owned(), decoded);
        }
        self.entries.get(reference).and_then(Option::as_ref)
    }

    /// Number of references currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many decode attempts have run. Grows once per distinct reference
    /// while it stays cached.
    #[must_use]
    pub fn decode_count(&self) -> usize {
        self.decodes
    }
}
