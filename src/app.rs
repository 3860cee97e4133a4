//! Application Coordinator
//!
//! Runs one command end to end: load the image, start the engine, do the work, release the
//! engine and print a report.

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use image::RgbaImage;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::load_image;
use crate::config::{save_config, AppConfig};
use crate::shared::messages::TuneProgress;
use crate::vision::pipeline::preprocess_whole;
use crate::vision::{
    dump_image, recognize_whole, release, AutoTuner, RecognitionResult, StopReason, TesseractEngine,
    TuneOutcome, ZoneRecognizer, ZoneResults,
};

/// How results are written out
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// Print JSON instead of the text report
    pub json: bool,
    /// Also write the prepared images here
    pub dump_dir: Option<PathBuf>,
}

fn open_image(path: &Path) -> Result<RgbaImage> {
    let image = load_image(path).with_context(|| format!("Failed to load {}", path.display()))?;
    info!(
        "Loaded {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(image)
}

async fn start_engine(config: &AppConfig) -> Result<TesseractEngine> {
    TesseractEngine::start(&config.engine)
        .await
        .context("Failed to start the recognition engine")
}

/// One-shot recognition of the whole image
pub async fn run_recognize(config: &AppConfig, path: &Path, output: &OutputOptions) -> Result<()> {
    let source = open_image(path)?;
    let mut engine = start_engine(config).await?;

    let outcome = recognize_whole(&mut engine, &source, &config.recognition).await;
    let (result, prepared) = release(engine, outcome).await?;

    if let Some(dir) = &output.dump_dir {
        let written = dump_image(dir, "whole", &prepared)?;
        info!("Prepared image written to {}", written.display());
    }

    if output.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_recognition(&result));
    }
    Ok(())
}

/// Recognize every zone of the configured template
pub async fn run_zones(config: &AppConfig, path: &Path, output: &OutputOptions) -> Result<()> {
    let template = &config.template;
    let source = open_image(path)?;
    let mut engine = start_engine(config).await?;

    let recognizer =
        ZoneRecognizer::new(template.failure_policy).with_dump_dir(output.dump_dir.clone());
    let outcome = recognizer.run(&mut engine, &source, &template.zones).await;
    let results = release(engine, outcome).await?;

    if output.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print!("{}", render_zones(&results));
    }
    Ok(())
}

/// Search the preprocessing grid on the whole image
///
/// Ctrl-C stops the search after the current trial and the best result so far is reported.
pub async fn run_autotune(config: &AppConfig, path: &Path, output: &OutputOptions) -> Result<()> {
    let source = open_image(path)?;
    let mut engine = start_engine(config).await?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing the current trial");
                cancel.cancel();
            }
        })
    };

    let (progress_tx, progress_rx) = unbounded::<TuneProgress>();
    let progress_thread = std::thread::spawn(move || {
        for progress in progress_rx {
            info!("{}", progress);
        }
    });

    let tuner = AutoTuner::new(config.autotune.clone(), config.recognition.params.clone())
        .with_progress(progress_tx)
        .with_cancellation(cancel);
    let outcome = tuner.run(&mut engine, &source).await;
    let outcome = release(engine, outcome).await;

    interrupt.abort();
    let space = tuner.space().clone();
    let best_config = outcome
        .as_ref()
        .ok()
        .and_then(|o| o.best.as_ref())
        .map(|best| tuner.trial_config(best.params));
    // Closes the progress channel
    drop(tuner);
    if progress_thread.join().is_err() {
        warn!("Progress reporter panicked");
    }

    let outcome = outcome?;

    if let (Some(dir), Some(settings)) = (&output.dump_dir, best_config) {
        let prepared = preprocess_whole(&source, &settings)?;
        let written = dump_image(dir, "autotune-best", &prepared)?;
        info!("Best trial image written to {}", written.display());
    }

    if output.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", render_autotune(&outcome, space.stop_score));
    }
    Ok(())
}

/// Write the default configuration
pub fn run_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    save_config(&AppConfig::default(), path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Text report for a one-shot recognition
pub fn render_recognition(result: &RecognitionResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// ! OCR Result");
    let _ = writeln!(out, "// * avg confidence: {}", result.confidence.round());
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", result.text);
    out
}

/// Text report for a zone run
pub fn render_zones(results: &ZoneResults) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// ! Zone OCR");
    for zone in results.iter() {
        match &zone.error {
            Some(error) => {
                let _ = writeln!(out, "{:<8} [failed] {}", zone.name, error);
            }
            None => {
                let _ = writeln!(
                    out,
                    "{:<8} [{:>3}] {}",
                    zone.name,
                    zone.result.confidence.round(),
                    zone.result.text
                );
            }
        }
    }
    let _ = writeln!(
        out,
        "// * {} zones, {} failed, {} ms",
        results.zones.len(),
        results.failed_count(),
        results.processing_time_ms
    );
    out
}

/// Text report for an auto-tune run
pub fn render_autotune(outcome: &TuneOutcome, stop_score: f32) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// ! Auto-tuned OCR");
    match &outcome.best {
        Some(best) => {
            let _ = writeln!(out, "// * confidence: {}", best.confidence.round());
            let _ = writeln!(
                out,
                "// * params: multiplier={}, offset={}, threshold={}",
                best.params.multiplier, best.params.offset, best.params.threshold
            );
            let _ = writeln!(out, "// * score: {:.2}", best.score);
            let _ = writeln!(out, "{}", best.text);
        }
        None => {
            let _ = writeln!(out, "// * no trial ran");
        }
    }

    let status = match outcome.stop {
        StopReason::Exhausted => "",
        StopReason::ScoreReached => " (stop score reached)",
        StopReason::Cancelled => " (cancelled)",
    };
    let _ = writeln!(
        out,
        "Best of {}/{} trials{}",
        outcome.tried, outcome.total, status
    );
    if outcome.stop == StopReason::Exhausted && outcome.best.is_some() {
        let _ = writeln!(out, "// * stop score {} not reached", stop_score);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config, Threshold};
    use crate::shared::messages::TrialParams;
    use crate::vision::autotune::Trial;
    use crate::vision::zones::ZoneOutcome;

    #[test]
    fn test_render_recognition() {
        let report = render_recognition(&RecognitionResult {
            text: "SV01-023\nDragon".to_string(),
            confidence: 86.6,
        });
        assert_eq!(
            report,
            "// ! OCR Result\n// * avg confidence: 87\n\nSV01-023\nDragon\n"
        );
    }

    #[test]
    fn test_render_zones_marks_failures() {
        let results = ZoneResults {
            zones: vec![
                ZoneOutcome {
                    name: "code".to_string(),
                    result: RecognitionResult {
                        text: "SV01".to_string(),
                        confidence: 91.2,
                    },
                    error: None,
                },
                ZoneOutcome {
                    name: "date".to_string(),
                    result: RecognitionResult::empty(),
                    error: Some("crop is empty".to_string()),
                },
            ],
            processing_time_ms: 40,
        };

        let report = render_zones(&results);
        assert!(report.contains("code     [ 91] SV01"));
        assert!(report.contains("date     [failed] crop is empty"));
        assert!(report.contains("2 zones, 1 failed"));
    }

    #[test]
    fn test_render_autotune() {
        let outcome = TuneOutcome {
            best: Some(Trial {
                step: 7,
                params: TrialParams {
                    multiplier: 1.4,
                    offset: -20.0,
                    threshold: Threshold::Off,
                },
                text: "SV01-023".to_string(),
                confidence: 96.4,
                score: 98.9,
            }),
            tried: 7,
            total: 100,
            stop: StopReason::ScoreReached,
            processing_time_ms: 900,
        };

        let report = render_autotune(&outcome, 95.0);
        assert!(report.contains("// * confidence: 96"));
        assert!(report.contains("multiplier=1.4, offset=-20, threshold=none"));
        assert!(report.contains("Best of 7/100 trials (stop score reached)"));
    }

    #[test]
    fn test_render_autotune_without_trials() {
        let outcome = TuneOutcome {
            best: None,
            tried: 0,
            total: 0,
            stop: StopReason::Exhausted,
            processing_time_ms: 0,
        };
        let report = render_autotune(&outcome, 95.0);
        assert!(report.contains("no trial ran"));
        assert!(report.contains("Best of 0/0 trials"));
    }

    #[test]
    fn test_init_config_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        run_init_config(&path, false).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.template.zones.len(), 5);

        // Refuses to clobber without --force
        assert!(run_init_config(&path, false).is_err());
        run_init_config(&path, true).unwrap();
    }
}
