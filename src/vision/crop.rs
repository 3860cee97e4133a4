//! Resize reference frame and normalized-rectangle cropping
//!
//! Zone rectangles are fractions of the *resized* card, while pixels are sampled from the
//! original image. A [`ReferenceFrame`] is the single resize pass both sides agree on: it can only
//! be obtained from [`resize_to_max_side`], and [`crop_normalized`] refuses a frame computed for a
//! different image.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::{debug, trace};

use crate::capture::frame::PixelBuffer;
use crate::config::NormalizedRect;
use crate::error::OcrError;

/// Resampling filter for downscaling (bilinear)
const RESAMPLE: FilterType = FilterType::Triangle;

/// Dimensions of one resize pass over a source image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceFrame {
    natural_width: u32,
    natural_height: u32,
    width: u32,
    height: u32,
    scale: f64,
}

impl ReferenceFrame {
    /// Resized width
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Resized height
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Factor from original to resized coordinates (never above 1)
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn natural_dimensions(&self) -> (u32, u32) {
        (self.natural_width, self.natural_height)
    }

    fn ensure_matches(&self, image: &RgbaImage) -> Result<(), OcrError> {
        if image.dimensions() != self.natural_dimensions() {
            return Err(OcrError::InvalidConfig(format!(
                "reference frame was computed for a {}x{} image, got {}x{}",
                self.natural_width,
                self.natural_height,
                image.width(),
                image.height()
            )));
        }
        Ok(())
    }
}

/// Absolute crop box in reference-frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Compute the frame that scales `image` so its longest side is at most `max_side`
pub fn resize_to_max_side(image: &RgbaImage, max_side: u32) -> Result<ReferenceFrame, OcrError> {
    if max_side == 0 {
        return Err(OcrError::InvalidConfig("max_side must be > 0".to_string()));
    }
    let (natural_width, natural_height) = image.dimensions();
    if natural_width == 0 || natural_height == 0 {
        return Err(OcrError::EmptyCrop {
            width: natural_width,
            height: natural_height,
        });
    }

    let longest = natural_width.max(natural_height) as f64;
    let scale = (max_side as f64 / longest).min(1.0);
    let width = ((natural_width as f64 * scale).round() as u32).max(1);
    let height = ((natural_height as f64 * scale).round() as u32).max(1);

    debug!(
        "Reference frame {}x{} -> {}x{} (scale {:.4})",
        natural_width, natural_height, width, height, scale
    );

    Ok(ReferenceFrame {
        natural_width,
        natural_height,
        width,
        height,
        scale,
    })
}

/// Convert a normalized rect to absolute pixels of a `frame_width` x `frame_height` frame
///
/// Each component is rounded to the nearest pixel; the box is then clipped to the frame.
pub fn absolute_crop_box(rect: &NormalizedRect, frame_width: u32, frame_height: u32) -> CropBox {
    let fw = frame_width as f64;
    let fh = frame_height as f64;

    let x = ((rect.x as f64 * fw).round().max(0.0) as u32).min(frame_width);
    let y = ((rect.y as f64 * fh).round().max(0.0) as u32).min(frame_height);
    let width = ((rect.w as f64 * fw).round().max(0.0) as u32).min(frame_width - x);
    let height = ((rect.h as f64 * fh).round().max(0.0) as u32).min(frame_height - y);

    CropBox {
        x,
        y,
        width,
        height,
    }
}

/// Crop `rect` out of `image`, sampling the original resolution
///
/// The output has the size of the absolute crop box in the reference frame. A box that rounds to
/// zero width or height is an [`OcrError::EmptyCrop`].
pub fn crop_normalized(
    image: &RgbaImage,
    rect: &NormalizedRect,
    frame: &ReferenceFrame,
) -> Result<PixelBuffer, OcrError> {
    frame.ensure_matches(image)?;

    let bbox = absolute_crop_box(rect, frame.width, frame.height);
    if bbox.width == 0 || bbox.height == 0 {
        return Err(OcrError::EmptyCrop {
            width: bbox.width,
            height: bbox.height,
        });
    }

    if frame.scale >= 1.0 {
        let cropped = imageops::crop_imm(image, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
        return PixelBuffer::try_from(cropped);
    }

    // Map the box back to source pixels; widen to whole pixels so the edges are covered
    let (nw, nh) = frame.natural_dimensions();
    let sx0 = ((bbox.x as f64 / frame.scale).floor() as u32).min(nw - 1);
    let sy0 = ((bbox.y as f64 / frame.scale).floor() as u32).min(nh - 1);
    let sx1 = (((bbox.x + bbox.width) as f64 / frame.scale).ceil() as u32).clamp(sx0 + 1, nw);
    let sy1 = (((bbox.y + bbox.height) as f64 / frame.scale).ceil() as u32).clamp(sy0 + 1, nh);

    trace!(
        "Crop {:?} samples source ({}, {})..({}, {})",
        bbox,
        sx0,
        sy0,
        sx1,
        sy1
    );

    let source = imageops::crop_imm(image, sx0, sy0, sx1 - sx0, sy1 - sy0).to_image();
    let resampled = imageops::resize(&source, bbox.width, bbox.height, RESAMPLE);
    PixelBuffer::try_from(resampled)
}

/// Draw the whole image at the frame size
pub fn render_frame(image: &RgbaImage, frame: &ReferenceFrame) -> Result<PixelBuffer, OcrError> {
    frame.ensure_matches(image)?;
    if frame.width == frame.natural_width && frame.height == frame.natural_height {
        return PixelBuffer::try_from(image.clone());
    }
    let resized = imageops::resize(image, frame.width, frame.height, RESAMPLE);
    PixelBuffer::try_from(resized)
}
