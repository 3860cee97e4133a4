//! RGBA pixel buffer passed between preprocessing stages

use image::RgbaImage;

use crate::error::OcrError;

/// Bytes per pixel (R, G, B, A)
pub const CHANNELS: usize = 4;

/// An owned RGBA raster
///
/// The length invariant (`width * height * 4`) is checked when the buffer is built, so the
/// transforms in `vision::ocr_preprocess` never have to re-validate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl PixelBuffer {
    /// Wrap raw RGBA bytes, rejecting a length that does not match the dimensions
    pub fn from_raw(data: Vec<u8>, width: u32, height: u32) -> Result<Self, OcrError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(OcrError::InvalidBuffer {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Build a buffer where every pixel has the same RGBA value
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat(width as usize * height as usize);
        Self {
            data,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Get dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// RGBA value at (x, y)
    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }

    /// Convert into an `image` buffer for encoding
    pub fn into_image(self) -> Result<RgbaImage, OcrError> {
        let (width, height) = (self.width, self.height);
        let actual = self.data.len();
        RgbaImage::from_raw(width, height, self.data).ok_or(OcrError::InvalidBuffer {
            width,
            height,
            expected: width as usize * height as usize * CHANNELS,
            actual,
        })
    }
}

impl TryFrom<RgbaImage> for PixelBuffer {
    type Error = OcrError;

    fn try_from(img: RgbaImage) -> Result<Self, Self::Error> {
        let (width, height) = img.dimensions();
        Self::from_raw(img.into_raw(), width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_validates_length() {
        let ok = PixelBuffer::from_raw(vec![0; 16], 2, 2);
        assert!(ok.is_ok());

        let err = PixelBuffer::from_raw(vec![0; 15], 2, 2).unwrap_err();
        assert!(matches!(
            err,
            OcrError::InvalidBuffer {
                expected: 16,
                actual: 15,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_sized_buffer() {
        let buf = PixelBuffer::from_raw(Vec::new(), 0, 5).unwrap();
        assert_eq!(buf.dimensions(), (0, 5));
    }

    #[test]
    fn test_pixel_lookup() {
        let data = vec![
            1, 2, 3, 4, //
            5, 6, 7, 8, //
        ];
        let buf = PixelBuffer::from_raw(data, 2, 1).unwrap();
        assert_eq!(buf.pixel(1, 0), [5, 6, 7, 8]);
    }

    #[test]
    fn test_image_conversion() {
        let img = RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 40]));
        let buf = PixelBuffer::try_from(img).unwrap();
        assert_eq!(buf.dimensions(), (3, 2));
        assert_eq!(buf.pixel(2, 1), [10, 20, 30, 40]);

        let back = buf.into_image().unwrap();
        assert_eq!(back.get_pixel(0, 0).0, [10, 20, 30, 40]);
    }
}
