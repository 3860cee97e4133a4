//! Error types shared by the preprocessing, cropping and recognition layers

use thiserror::Error;

/// Errors raised by the OCR core.
///
/// The binary wraps these in `anyhow` for reporting; library code returns them directly so that
/// callers (the zone orchestrator in particular) can decide per variant what to do.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Invalid pixel buffer: {width}x{height} needs {expected} bytes, got {actual}")]
    InvalidBuffer {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Crop region is empty ({width}x{height} px after scaling)")]
    EmptyCrop { width: u32, height: u32 },

    #[error("Failed to decode image: {0}")]
    ImageDecode(#[source] image::ImageError),

    #[error("Failed to encode image: {0}")]
    ImageEncode(String),

    #[error("Engine rejected parameters: {0}")]
    EngineConfiguration(String),

    #[error("Recognition failed: {0}")]
    RecognitionFailure(String),

    #[error("Recognition engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    /// Short label used in reports and logs
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::InvalidBuffer { .. } => "invalid_buffer",
            OcrError::EmptyCrop { .. } => "empty_crop",
            OcrError::ImageDecode(_) => "image_decode",
            OcrError::ImageEncode(_) => "image_encode",
            OcrError::EngineConfiguration(_) => "engine_configuration",
            OcrError::RecognitionFailure(_) => "recognition_failure",
            OcrError::EngineUnavailable(_) => "engine_unavailable",
            OcrError::InvalidConfig(_) => "invalid_config",
            OcrError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_buffer_message() {
        let err = OcrError::InvalidBuffer {
            width: 2,
            height: 2,
            expected: 16,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "Invalid pixel buffer: 2x2 needs 16 bytes, got 12"
        );
        assert_eq!(err.kind(), "invalid_buffer");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: OcrError = io.into();
        assert_eq!(err.kind(), "io");
    }
}
