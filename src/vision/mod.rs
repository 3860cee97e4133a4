//! Vision/OCR Layer
//!
//! Turns a card image into text:
//! - Zone recognition: crop named regions of a fixed layout, filter them, recognize each
//! - One-shot recognition of the whole image
//! - Auto-tuning of the contrast/offset/threshold filters on the whole image

pub mod autotune;
pub mod crop;
pub mod ocr;
pub mod ocr_preprocess;
pub mod pipeline;
pub mod tesseract;
pub mod zones;

pub use autotune::{AutoTuner, StopReason, TuneOutcome};
pub use ocr::{recognize_normalized, release, RecognitionEngine, RecognitionResult};
pub use pipeline::{dump_image, encode_png, EncodedImage};
pub use tesseract::TesseractEngine;
pub use zones::{ZoneRecognizer, ZoneResults};

use image::RgbaImage;
use tracing::debug;

use crate::config::RecognitionSettings;
use crate::error::OcrError;

/// Prepare the whole image for a one-shot call
///
/// The image is scaled down to `settings.max_side`. When filters are configured they run on
/// that frame; otherwise the scaled frame is encoded unchanged.
pub fn prepare_whole(
    source: &RgbaImage,
    settings: &RecognitionSettings,
) -> Result<EncodedImage, OcrError> {
    let prepared = pipeline::prepare_frame(source, settings.max_side)?;
    match &settings.preprocess {
        Some(filters) => {
            debug!("One-shot recognition with filters: {:?}", filters);
            pipeline::preprocess_prepared(&prepared, filters)
        }
        None => encode_png(&prepared),
    }
}

/// Recognize the whole image in a single engine call
pub async fn recognize_whole<E>(
    engine: &mut E,
    source: &RgbaImage,
    settings: &RecognitionSettings,
) -> Result<(RecognitionResult, EncodedImage), OcrError>
where
    E: RecognitionEngine + ?Sized,
{
    settings.params.validate()?;
    let image = prepare_whole(source, settings)?;
    let result = recognize_normalized(engine, &image, &settings.params).await?;
    Ok((result, image))
}
