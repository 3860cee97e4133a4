//! Zone preprocessing pipeline
//!
//! resize frame -> crop -> filter chain -> PNG. The PNG is what the recognition engine consumes
//! and what `--dump-dir` writes to disk.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::capture::frame::PixelBuffer;
use crate::config::{PreprocessConfig, ZoneSpec};
use crate::error::OcrError;
use crate::vision::crop::{crop_normalized, render_frame, resize_to_max_side};
use crate::vision::ocr_preprocess::apply_preprocessing;

pub const PNG_MIME: &str = "image/png";

/// An encoded image ready for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// PNG bytes
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Preprocess one zone of `source` into an encoded image
pub fn preprocess_zone(source: &RgbaImage, zone: &ZoneSpec) -> Result<EncodedImage, OcrError> {
    let frame = resize_to_max_side(source, zone.preprocess.max_side)?;
    let cropped = crop_normalized(source, &zone.rect, &frame)?;
    debug!(
        "Zone \"{}\": rect {} on {}x{} frame (scale {:.4}) -> {}x{} crop",
        zone.name,
        zone.rect,
        frame.width(),
        frame.height(),
        frame.scale(),
        cropped.width(),
        cropped.height()
    );
    let processed = apply_preprocessing(cropped, &zone.preprocess);
    encode_png(&processed)
}

/// Resize the whole image to its reference frame, without filtering
pub fn prepare_frame(source: &RgbaImage, max_side: u32) -> Result<PixelBuffer, OcrError> {
    let frame = resize_to_max_side(source, max_side)?;
    render_frame(source, &frame)
}

/// Filter an already-resized frame and encode it; `prepared` is left untouched
pub fn preprocess_prepared(
    prepared: &PixelBuffer,
    settings: &PreprocessConfig,
) -> Result<EncodedImage, OcrError> {
    let processed = apply_preprocessing(prepared.clone(), settings);
    encode_png(&processed)
}

/// Preprocess the un-cropped image
pub fn preprocess_whole(
    source: &RgbaImage,
    settings: &PreprocessConfig,
) -> Result<EncodedImage, OcrError> {
    let prepared = prepare_frame(source, settings.max_side)?;
    preprocess_prepared(&prepared, settings)
}

/// Write a prepared image as `<dir>/<name>.png`
pub fn dump_image(dir: &Path, name: &str, image: &EncodedImage) -> Result<PathBuf, OcrError> {
    std::fs::create_dir_all(dir)?;
    let file_stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let path = dir.join(format!("{}.png", file_stem));
    std::fs::write(&path, &image.bytes)?;
    debug!("Wrote {}", path.display());
    Ok(path)
}

/// Encode as PNG, falling back to the data-URI path if the encoder produces nothing
pub fn encode_png(buf: &PixelBuffer) -> Result<EncodedImage, OcrError> {
    encode_png_with(buf, primary_png)
}

fn encode_png_with<F>(buf: &PixelBuffer, primary: F) -> Result<EncodedImage, OcrError>
where
    F: FnOnce(&PixelBuffer) -> Result<Vec<u8>, OcrError>,
{
    let bytes = match primary(buf) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => {
            warn!("PNG encoder returned no data, using data-URI fallback");
            decode_data_uri(&to_data_uri(buf)?)?
        }
        Err(e) => {
            warn!("PNG encoder failed ({}), using data-URI fallback", e);
            decode_data_uri(&to_data_uri(buf)?)?
        }
    };

    Ok(EncodedImage {
        bytes,
        width: buf.width(),
        height: buf.height(),
    })
}

/// Fixed compression and filter settings so output is reproducible
fn primary_png(buf: &PixelBuffer) -> Result<Vec<u8>, OcrError> {
    let mut bytes = Vec::new();
    PngEncoder::new_with_quality(&mut bytes, CompressionType::Default, FilterType::Adaptive)
        .write_image(buf.data(), buf.width(), buf.height(), ExtendedColorType::Rgba8)
        .map_err(|e| OcrError::ImageEncode(e.to_string()))?;
    Ok(bytes)
}

/// Encode as a `data:image/png;base64,...` URI
pub fn to_data_uri(buf: &PixelBuffer) -> Result<String, OcrError> {
    let img = buf.clone().into_image()?;
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| OcrError::ImageEncode(e.to_string()))?;
    Ok(format!("data:{};base64,{}", PNG_MIME, STANDARD.encode(&bytes)))
}

/// Extract the payload bytes of a base64 data URI
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, OcrError> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| OcrError::ImageEncode("data URI has no payload".to_string()))?;
    if !header.starts_with("data:") || !header.ends_with(";base64") {
        return Err(OcrError::ImageEncode(format!(
            "unsupported data URI header \"{}\"",
            header
        )));
    }
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| OcrError::ImageEncode(e.to_string()))?;
    if bytes.is_empty() {
        return Err(OcrError::ImageEncode("data URI payload is empty".to_string()));
    }
    Ok(bytes)
}
