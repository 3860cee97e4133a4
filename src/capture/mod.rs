//! Image Source Layer
//!
//! Loads card images from disk or from encoded bytes into RGBA rasters. Decoding is the only
//! I/O the preprocessing core performs on its input.

pub mod frame;

use image::RgbaImage;
use std::path::Path;
use tracing::debug;

use crate::error::OcrError;

/// Decode an encoded image (PNG, JPEG, ...) into RGBA
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, OcrError> {
    let img = image::load_from_memory(bytes).map_err(OcrError::ImageDecode)?;
    let rgba = img.to_rgba8();
    debug!("Decoded {}x{} image ({} bytes)", rgba.width(), rgba.height(), bytes.len());
    Ok(rgba)
}

/// Read and decode an image file
pub fn load_image(path: &Path) -> Result<RgbaImage, OcrError> {
    let bytes = std::fs::read(path)?;
    decode_image(&bytes)
}
