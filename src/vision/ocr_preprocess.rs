//! Pixel filters applied before recognition
//!
//! Every filter works on an RGBA [`PixelBuffer`]. After [`apply_grayscale`] the three color
//! channels carry the same value, and the later filters read channel 0 and write the result
//! back to R, G and B.

use tracing::{debug, warn};

use crate::capture::frame::{PixelBuffer, CHANNELS};
use crate::config::{PreprocessConfig, Threshold};

/// Run the filter chain for one prepared image
///
/// Order: grayscale, median (kernel > 1), contrast/offset, threshold, invert. The median runs on
/// raw grayscale before any contrast distortion, and inversion comes last so that it flips the
/// binarized values.
pub fn apply_preprocessing(mut buf: PixelBuffer, settings: &PreprocessConfig) -> PixelBuffer {
    debug!(
        "Preprocessing {}x{}: median={}, multiplier={}, offset={}, threshold={}, invert={}",
        buf.width(),
        buf.height(),
        settings.median_kernel_size,
        settings.contrast_multiplier,
        settings.offset,
        settings.threshold,
        settings.invert
    );

    apply_grayscale(&mut buf);

    if settings.median_kernel_size > 1 {
        buf = apply_median(&buf, settings.median_kernel_size);
    }

    apply_contrast_offset(&mut buf, settings.contrast_multiplier, settings.offset);
    apply_threshold(&mut buf, settings.threshold);

    if settings.invert {
        apply_invert(&mut buf);
    }

    buf
}

#[inline]
fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[inline]
fn write_gray(chunk: &mut [u8], value: u8) {
    chunk[0] = value;
    chunk[1] = value;
    chunk[2] = value;
}

/// Convert to grayscale in place (RGBA layout kept, alpha untouched)
pub fn apply_grayscale(buf: &mut PixelBuffer) {
    for chunk in buf.data_mut().chunks_exact_mut(CHANNELS) {
        // Standard luminance weights
        let gray = 0.299 * chunk[0] as f32 + 0.587 * chunk[1] as f32 + 0.114 * chunk[2] as f32;
        write_gray(chunk, to_u8(gray));
    }
}

/// Median filter over a `kernel_size` x `kernel_size` window with edge-replicated borders
///
/// Reads channel 0 of `buf` and returns a new buffer; alpha is set to 255.
pub fn apply_median(buf: &PixelBuffer, kernel_size: u32) -> PixelBuffer {
    if kernel_size <= 1 {
        return buf.clone();
    }
    let kernel_size = if kernel_size % 2 == 0 {
        warn!("Median kernel size {} is even, using {}", kernel_size, kernel_size + 1);
        kernel_size + 1
    } else {
        kernel_size
    };

    let (width, height) = buf.dimensions();
    let w = width as i64;
    let h = height as i64;
    let radius = (kernel_size / 2) as i64;
    let src = buf.data();

    let mut out = PixelBuffer::filled(width, height, [0, 0, 0, 255]);
    let mut window: Vec<u8> = Vec::with_capacity((kernel_size * kernel_size) as usize);

    for y in 0..h {
        for x in 0..w {
            window.clear();
            for dy in -radius..=radius {
                let sy = (y + dy).clamp(0, h - 1);
                for dx in -radius..=radius {
                    let sx = (x + dx).clamp(0, w - 1);
                    window.push(src[((sy * w + sx) as usize) * CHANNELS]);
                }
            }
            window.sort_unstable();
            let median = window[window.len() / 2];

            let idx = ((y * w + x) as usize) * CHANNELS;
            write_gray(&mut out.data_mut()[idx..idx + CHANNELS], median);
        }
    }

    out
}

/// Linear adjustment `v * multiplier + offset`, clamped to 0..=255
pub fn apply_contrast_offset(buf: &mut PixelBuffer, multiplier: f32, offset: f32) {
    if (multiplier - 1.0).abs() < f32::EPSILON && offset == 0.0 {
        return;
    }
    for chunk in buf.data_mut().chunks_exact_mut(CHANNELS) {
        let adjusted = chunk[0] as f32 * multiplier + offset;
        write_gray(chunk, to_u8(adjusted));
    }
}

/// Binarize: 255 where the value is at or above the level, 0 elsewhere. `Threshold::Off` is a
/// no-op.
pub fn apply_threshold(buf: &mut PixelBuffer, threshold: Threshold) {
    let Some(level) = threshold.level() else {
        return;
    };
    for chunk in buf.data_mut().chunks_exact_mut(CHANNELS) {
        let value = if chunk[0] as f32 >= level { 255 } else { 0 };
        write_gray(chunk, value);
    }
}

/// Invert RGB values (light text on dark backgrounds)
pub fn apply_invert(buf: &mut PixelBuffer) {
    for chunk in buf.data_mut().chunks_exact_mut(CHANNELS) {
        chunk[0] = 255 - chunk[0];
        chunk[1] = 255 - chunk[1];
        chunk[2] = 255 - chunk[2];
        // Alpha unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn buffer(pixels: &[[u8; 4]], width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::from_raw(pixels.concat(), width, height).unwrap()
    }

    fn gradient(width: u32, height: u32) -> PixelBuffer {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let v = ((x * 37 + y * 91) % 256) as u8;
                data.extend_from_slice(&[v, v.wrapping_mul(3), 255 - v, 200]);
            }
        }
        PixelBuffer::from_raw(data, width, height).unwrap()
    }

    #[test]
    fn test_grayscale() {
        let mut buf = buffer(&[[255, 0, 0, 255]], 1, 1);
        apply_grayscale(&mut buf);
        // 0.299 * 255 = 76.245
        assert_eq!(buf.pixel(0, 0), [76, 76, 76, 255]);
    }

    #[test]
    fn test_grayscale_keeps_alpha() {
        let mut buf = buffer(&[[10, 200, 30, 17]], 1, 1);
        apply_grayscale(&mut buf);
        assert_eq!(buf.pixel(0, 0)[3], 17);
    }

    #[test]
    fn test_grayscale_idempotent() {
        let mut once = gradient(9, 7);
        apply_grayscale(&mut once);
        let mut twice = once.clone();
        apply_grayscale(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_threshold_idempotent() {
        for level in [0.0, 1.0, 100.0, 127.5, 255.0, 300.0] {
            let mut once = gradient(8, 8);
            apply_grayscale(&mut once);
            apply_threshold(&mut once, Threshold::At(level));
            let mut twice = once.clone();
            apply_threshold(&mut twice, Threshold::At(level));
            assert_eq!(once, twice, "threshold {} not idempotent", level);
        }
    }

    #[test]
    fn test_threshold_off_is_noop() {
        let mut buf = gradient(4, 4);
        let before = buf.clone();
        apply_threshold(&mut buf, Threshold::Off);
        assert_eq!(buf, before);
    }

    #[test]
    fn test_invert_twice_is_identity() {
        let original = gradient(6, 5);
        let mut buf = original.clone();
        apply_invert(&mut buf);
        assert_ne!(buf, original);
        apply_invert(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn test_invert() {
        let mut buf = buffer(&[[0, 100, 255, 255]], 1, 1);
        apply_invert(&mut buf);
        assert_eq!(buf.pixel(0, 0), [255, 155, 0, 255]);
    }

    #[test]
    fn test_contrast_offset_clamps() {
        let mut buf = buffer(&[[100, 100, 100, 255], [200, 200, 200, 255], [10, 10, 10, 255]], 3, 1);
        apply_contrast_offset(&mut buf, 1.5, -20.0);
        // 100*1.5-20 = 130, 200*1.5-20 = 280 -> 255, 10*1.5-20 = -5 -> 0
        assert_eq!(buf.pixel(0, 0), [130, 130, 130, 255]);
        assert_eq!(buf.pixel(1, 0), [255, 255, 255, 255]);
        assert_eq!(buf.pixel(2, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn test_median_constant_buffer_unchanged() {
        let buf = PixelBuffer::filled(7, 5, [42, 42, 42, 255]);
        for k in [3, 5, 9] {
            let out = apply_median(&buf, k);
            assert_eq!(out, buf);
        }
    }

    #[test]
    fn test_median_preserves_dimensions() {
        let buf = gradient(11, 3);
        let out = apply_median(&buf, 5);
        assert_eq!(out.dimensions(), (11, 3));
        assert_eq!(out.data().len(), buf.data().len());
    }

    #[test]
    fn test_median_removes_salt_noise() {
        let mut buf = PixelBuffer::filled(5, 5, [0, 0, 0, 255]);
        let idx = (2 * 5 + 2) * CHANNELS;
        buf.data_mut()[idx..idx + 3].copy_from_slice(&[255, 255, 255]);

        let out = apply_median(&buf, 3);
        assert_eq!(out.pixel(2, 2), [0, 0, 0, 255]);
    }

    #[test]
    fn test_median_sets_alpha_opaque() {
        let buf = PixelBuffer::filled(3, 3, [80, 80, 80, 10]);
        let out = apply_median(&buf, 3);
        assert_eq!(out.pixel(1, 1), [80, 80, 80, 255]);
    }

    #[test]
    fn test_median_kernel_one_is_noop() {
        let buf = gradient(4, 4);
        assert_eq!(apply_median(&buf, 1), buf);
        assert_eq!(apply_median(&buf, 0), buf);
    }

    #[test]
    fn test_median_matches_imageproc() {
        let mut buf = gradient(13, 9);
        apply_grayscale(&mut buf);

        let gray = GrayImage::from_fn(13, 9, |x, y| Luma([buf.pixel(x, y)[0]]));
        let expected = imageproc::filter::median_filter(&gray, 1, 1);

        let out = apply_median(&buf, 3);
        for (x, y, p) in expected.enumerate_pixels() {
            assert_eq!(out.pixel(x, y)[0], p[0], "mismatch at ({}, {})", x, y);
        }
    }

    #[test]
    fn test_binarize_scenario() {
        let buf = buffer(
            &[
                [0, 0, 0, 255],
                [255, 255, 255, 255],
                [128, 128, 128, 255],
                [64, 64, 64, 255],
            ],
            2,
            2,
        );
        let settings = PreprocessConfig {
            median_kernel_size: 1,
            contrast_multiplier: 1.0,
            offset: 0.0,
            threshold: Threshold::At(100.0),
            invert: false,
            ..PreprocessConfig::default()
        };

        let out = apply_preprocessing(buf, &settings);
        let values: Vec<u8> = out.data().chunks_exact(4).map(|c| c[0]).collect();
        assert_eq!(values, vec![0, 255, 255, 0]);
        for chunk in out.data().chunks_exact(4) {
            assert_eq!(chunk[0], chunk[1]);
            assert_eq!(chunk[1], chunk[2]);
        }
    }

    #[test]
    fn test_invert_applies_after_threshold() {
        let buf = buffer(&[[200, 200, 200, 255], [20, 20, 20, 255]], 2, 1);
        let settings = PreprocessConfig {
            median_kernel_size: 1,
            threshold: Threshold::At(128.0),
            invert: true,
            ..PreprocessConfig::default()
        };

        let out = apply_preprocessing(buf, &settings);
        assert_eq!(out.pixel(0, 0)[0], 0);
        assert_eq!(out.pixel(1, 0)[0], 255);
    }
}
