//! Preprocessing auto-tuner
//!
//! Grid search over contrast multiplier x offset x threshold on the whole (un-cropped) image.
//! Each trial is scored from the engine confidence plus a few text features, and the search
//! stops early once a trial scores high enough.

use crossbeam_channel::Sender;
use image::RgbaImage;
use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{EngineParams, PreprocessConfig, SearchSpace};
use crate::error::OcrError;
use crate::shared::messages::{TrialParams, TuneProgress};
use crate::vision::ocr::{RecognitionEngine, RecognitionResult};
use crate::vision::pipeline::{prepare_frame, preprocess_prepared};

/// Ranking heuristic for one recognition
///
/// `confidence + 0.3 * digits + 0.05 * uppercase + 2 * min(chars / 200, 1)`
pub fn score_text(text: &str, confidence: f32) -> f32 {
    let digits = text.chars().filter(char::is_ascii_digit).count();
    let uppers = text.chars().filter(char::is_ascii_uppercase).count();
    let length_bonus = (text.chars().count() as f32 / 200.0).min(1.0);
    confidence + digits as f32 * 0.3 + uppers as f32 * 0.05 + length_bonus * 2.0
}

/// One evaluated grid point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trial {
    /// 1-based position in the grid
    pub step: usize,
    pub params: TrialParams,
    pub text: String,
    pub confidence: f32,
    pub score: f32,
}

/// Why the search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every combination was tried
    Exhausted,
    /// The best score reached the stop score
    ScoreReached,
    /// The cancellation token fired between trials
    Cancelled,
}

/// Result of a search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuneOutcome {
    /// Highest-scoring trial; `None` when no trial ran
    pub best: Option<Trial>,
    /// Trials actually run
    pub tried: usize,
    /// Size of the grid
    pub total: usize,
    pub stop: StopReason,
    pub processing_time_ms: u64,
}

/// Grid search driver
#[derive(Debug, Clone)]
pub struct AutoTuner {
    space: SearchSpace,
    params: EngineParams,
    progress: Option<Sender<TuneProgress>>,
    cancel: Option<CancellationToken>,
}

impl AutoTuner {
    /// Search `space`, recognizing every trial with `params`
    pub fn new(space: SearchSpace, params: EngineParams) -> Self {
        Self {
            space,
            params,
            progress: None,
            cancel: None,
        }
    }

    /// Send one [`TuneProgress`] per trial to `sender`
    pub fn with_progress(mut self, sender: Sender<TuneProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Stop between trials once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    /// Filters for one trial; median kernel and inversion stay fixed
    pub fn trial_config(&self, params: TrialParams) -> PreprocessConfig {
        PreprocessConfig {
            max_side: self.space.max_side,
            median_kernel_size: self.space.median_kernel_size,
            contrast_multiplier: params.multiplier,
            offset: params.offset,
            threshold: params.threshold,
            invert: self.space.invert,
        }
    }

    /// Run the search
    ///
    /// The image is resized once; every trial filters a copy of that frame. A preprocessing or
    /// recognition failure aborts the search.
    pub async fn run<E>(&self, engine: &mut E, source: &RgbaImage) -> Result<TuneOutcome, OcrError>
    where
        E: RecognitionEngine + ?Sized,
    {
        self.space.validate()?;
        self.params.validate()?;

        let start = Instant::now();
        let total = self.space.total_trials();
        let prepared = prepare_frame(source, self.space.max_side)?;
        info!(
            "Auto-tuning over {} combinations ({}x{} frame, stop score {})",
            total,
            prepared.width(),
            prepared.height(),
            self.space.stop_score
        );

        let mut best: Option<Trial> = None;
        let mut step = 0usize;

        for &multiplier in &self.space.multipliers {
            for &offset in &self.space.offsets {
                for &threshold in &self.space.thresholds {
                    if self.is_cancelled() {
                        info!("Auto-tune cancelled after {} trials", step);
                        return Ok(self.finish(best, step, total, StopReason::Cancelled, start));
                    }

                    step += 1;
                    let params = TrialParams {
                        multiplier,
                        offset,
                        threshold,
                    };
                    self.report(TuneProgress {
                        step,
                        total,
                        params,
                    });

                    let image = preprocess_prepared(&prepared, &self.trial_config(params))?;
                    let raw = engine.recognize(&image, &self.params).await?;
                    let result = RecognitionResult::from_raw(&raw);
                    // Scored on the untrimmed engine text; the trial keeps the trimmed one
                    let score = score_text(&raw.text, result.confidence);
                    debug!("Trial {}/{} [{}]: score {:.2}", step, total, params, score);

                    // Strictly greater: the earliest trial wins ties
                    if best.as_ref().map_or(true, |b| score > b.score) {
                        best = Some(Trial {
                            step,
                            params,
                            text: result.text,
                            confidence: result.confidence,
                            score,
                        });
                    }

                    if best
                        .as_ref()
                        .is_some_and(|b| b.score >= self.space.stop_score)
                    {
                        info!("Stop score reached at trial {}/{}", step, total);
                        return Ok(self.finish(best, step, total, StopReason::ScoreReached, start));
                    }
                }
            }
        }

        Ok(self.finish(best, step, total, StopReason::Exhausted, start))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn report(&self, progress: TuneProgress) {
        if let Some(sender) = &self.progress {
            if sender.send(progress).is_err() {
                debug!("Progress receiver dropped");
            }
        }
    }

    fn finish(
        &self,
        best: Option<Trial>,
        tried: usize,
        total: usize,
        stop: StopReason,
        start: Instant,
    ) -> TuneOutcome {
        let outcome = TuneOutcome {
            best,
            tried,
            total,
            stop,
            processing_time_ms: start.elapsed().as_millis() as u64,
        };
        if let Some(best) = &outcome.best {
            info!(
                "Best of {}/{} trials: [{}] score {:.2}, confidence {:.1}",
                outcome.tried, outcome.total, best.params, best.score, best.confidence
            );
        }
        outcome
    }
}
