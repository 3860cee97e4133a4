//! Zone recognition orchestrator
//!
//! Runs every zone of a template through preprocessing and the engine, one after another, and
//! collects the results by zone name.

use image::RgbaImage;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{validate_zones, FailurePolicy, ZoneSpec};
use crate::error::OcrError;
use crate::vision::ocr::{recognize_normalized, RecognitionEngine, RecognitionResult};
use crate::vision::pipeline::{dump_image, preprocess_zone};

/// Result for one zone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneOutcome {
    pub name: String,
    #[serde(flatten)]
    pub result: RecognitionResult,
    /// Failure message when the zone was isolated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Results of a template run, in zone order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ZoneResults {
    pub zones: Vec<ZoneOutcome>,
    pub processing_time_ms: u64,
}

impl ZoneResults {
    pub fn iter(&self) -> impl Iterator<Item = &ZoneOutcome> {
        self.zones.iter()
    }

    /// Number of zones recorded as failed
    pub fn failed_count(&self) -> usize {
        self.zones.iter().filter(|z| z.error.is_some()).count()
    }
}

/// Runs a zone list against one engine
#[derive(Debug, Clone, Default)]
pub struct ZoneRecognizer {
    policy: FailurePolicy,
    dump_dir: Option<PathBuf>,
}

impl ZoneRecognizer {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            dump_dir: None,
        }
    }

    /// Also write every prepared zone image to `dir`
    pub fn with_dump_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.dump_dir = dir;
        self
    }

    /// Recognize all zones in order
    ///
    /// Only the zone names are checked up front. Anything else that goes wrong with a zone,
    /// including its engine params, is a zone failure: under [`FailurePolicy::Isolate`] it
    /// becomes an empty, zero-confidence result and the batch continues; under
    /// [`FailurePolicy::Abort`] the first failure is returned.
    pub async fn run<E>(
        &self,
        engine: &mut E,
        source: &RgbaImage,
        zones: &[ZoneSpec],
    ) -> Result<ZoneResults, OcrError>
    where
        E: RecognitionEngine + ?Sized,
    {
        validate_zones(zones)?;
        let start = Instant::now();
        let mut results = ZoneResults::default();

        for zone in zones {
            match self.recognize_zone(engine, source, zone).await {
                Ok(result) => {
                    debug!(
                        "Zone \"{}\": {:?} ({:.1}%)",
                        zone.name, result.text, result.confidence
                    );
                    results.zones.push(ZoneOutcome {
                        name: zone.name.clone(),
                        result,
                        error: None,
                    });
                }
                Err(e) => match self.policy {
                    FailurePolicy::Abort => {
                        warn!("Zone \"{}\" failed, aborting batch: {}", zone.name, e);
                        return Err(e);
                    }
                    FailurePolicy::Isolate => {
                        warn!("Zone \"{}\" failed ({}): {}", zone.name, e.kind(), e);
                        results.zones.push(ZoneOutcome {
                            name: zone.name.clone(),
                            result: RecognitionResult::empty(),
                            error: Some(e.to_string()),
                        });
                    }
                },
            }
        }

        results.processing_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Recognized {} zones ({} failed) in {} ms",
            results.zones.len(),
            results.failed_count(),
            results.processing_time_ms
        );
        Ok(results)
    }

    async fn recognize_zone<E>(
        &self,
        engine: &mut E,
        source: &RgbaImage,
        zone: &ZoneSpec,
    ) -> Result<RecognitionResult, OcrError>
    where
        E: RecognitionEngine + ?Sized,
    {
        zone.engine.validate()?;
        let prepared = preprocess_zone(source, zone)?;
        if let Some(dir) = &self.dump_dir {
            // Debug output only; never fails the zone
            if let Err(e) = dump_image(dir, &zone.name, &prepared) {
                warn!("Could not dump zone \"{}\": {}", zone.name, e);
            }
        }
        recognize_normalized(engine, &prepared, &zone.engine).await
    }
}

/// Recognize `zones` with the given failure policy
pub async fn recognize_zones<E>(
    engine: &mut E,
    source: &RgbaImage,
    zones: &[ZoneSpec],
    policy: FailurePolicy,
) -> Result<ZoneResults, OcrError>
where
    E: RecognitionEngine + ?Sized,
{
    ZoneRecognizer::new(policy).run(engine, source, zones).await
}
