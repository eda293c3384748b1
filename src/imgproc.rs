//! Upload validation and thumbnail generation.
//!
//! Uploads are sniffed from their bytes, never trusted from the declared
//! filename. Thumbnails are resized to a max dimension and encoded as
//! lossy WebP.

use anyhow::{Context, Result};
use image::GenericImageView;

/// Media types an upload may carry.
const ALLOWED_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Sniff the media type from the payload. Returns `(mime, extension)` for
/// supported image types, `None` otherwise.
pub fn sniff_image_type(data: &[u8]) -> Option<(&'static str, &'static str)> {
    let kind = infer::get(data)?;
    let mime = kind.mime_type();
    if ALLOWED_TYPES.contains(&mime) {
        Some((mime, kind.extension()))
    } else {
        None
    }
}

/// Generate a WebP thumbnail capped at `max_dimension` on the longer side.
pub fn make_thumbnail(data: &[u8], max_dimension: u32, quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data).context("Failed to decode image")?;

    let (w, h) = img.dimensions();
    let img = if w > max_dimension || h > max_dimension {
        img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        img
    };

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let encoder = webp::Encoder::from_rgba(&rgba, width, height);
    Ok(encoder.encode(quality as f32).to_vec())
}
