//! Recognition engine contract
//!
//! An engine receives an encoded image together with the parameters for that call, so
//! configuration and recognition are one step and cannot interleave between zones. `&mut self`
//! keeps a single instance from serving two calls at once; callers that want parallelism create
//! one engine per task.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::EngineParams;
use crate::error::OcrError;
use crate::vision::pipeline::EncodedImage;

/// One recognized word
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    /// Word confidence (0-100)
    pub confidence: f32,
}

/// Output of a single engine call, before normalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecognition {
    pub text: String,
    /// Aggregate confidence, when the engine reports one
    pub confidence: Option<f32>,
    pub words: Vec<OcrWord>,
}

impl RawRecognition {
    /// Aggregate confidence, else mean word confidence, else 0
    pub fn resolved_confidence(&self) -> f32 {
        if let Some(confidence) = self.confidence {
            return confidence;
        }
        if self.words.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.words.iter().map(|w| w.confidence).sum();
        sum / self.words.len() as f32
    }
}

/// Text and confidence for one zone or one whole-image call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub text: String,
    /// Confidence in [0, 100]
    pub confidence: f32,
}

impl RecognitionResult {
    /// Trim the text and settle the confidence
    pub fn from_raw(raw: &RawRecognition) -> Self {
        let confidence = raw.resolved_confidence();
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            text: raw.text.trim().to_string(),
            confidence,
        }
    }

    /// Result recorded for a zone that failed
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A text recognition backend
#[async_trait]
pub trait RecognitionEngine: Send {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Apply `params` and recognize `image`
    async fn recognize(
        &mut self,
        image: &EncodedImage,
        params: &EngineParams,
    ) -> Result<RawRecognition, OcrError>;

    /// Release engine resources; the engine must not be used afterwards
    async fn shutdown(&mut self) -> Result<(), OcrError> {
        Ok(())
    }
}

/// Recognize and normalize in one call
pub async fn recognize_normalized<E>(
    engine: &mut E,
    image: &EncodedImage,
    params: &EngineParams,
) -> Result<RecognitionResult, OcrError>
where
    E: RecognitionEngine + ?Sized,
{
    let raw = engine.recognize(image, params).await?;
    let result = RecognitionResult::from_raw(&raw);
    debug!(
        "{}: {} chars at {:.1}% confidence",
        engine.name(),
        result.text.chars().count(),
        result.confidence
    );
    Ok(result)
}

/// Shut the engine down and hand back `outcome`
///
/// Call this on every exit path once the engine's work is done. A shutdown failure is logged;
/// it only replaces the outcome when the work itself succeeded.
pub async fn release<E, T>(mut engine: E, outcome: Result<T, OcrError>) -> Result<T, OcrError>
where
    E: RecognitionEngine,
{
    match (engine.shutdown().await, outcome) {
        (Ok(()), outcome) => outcome,
        (Err(e), Ok(_)) => {
            warn!("{} shutdown failed: {}", engine.name(), e);
            Err(e)
        }
        (Err(e), Err(original)) => {
            warn!("{} shutdown failed after error: {}", engine.name(), e);
            Err(original)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted engine for orchestrator and tuner tests

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Script = Box<dyn FnMut(&EncodedImage, &EngineParams) -> Result<RawRecognition, OcrError> + Send>;

    /// Engine whose answers come from a closure; records every call
    pub struct ScriptedEngine {
        script: Script,
        pub calls: Vec<EngineParams>,
        pub shutdowns: Arc<AtomicUsize>,
        pub fail_shutdown: bool,
    }

    impl ScriptedEngine {
        pub fn new<F>(script: F) -> Self
        where
            F: FnMut(&EncodedImage, &EngineParams) -> Result<RawRecognition, OcrError> + Send + 'static,
        {
            Self {
                script: Box::new(script),
                calls: Vec::new(),
                shutdowns: Arc::new(AtomicUsize::new(0)),
                fail_shutdown: false,
            }
        }

        pub fn shutdown_count(&self) -> usize {
            self.shutdowns.load(Ordering::SeqCst)
        }
    }

    pub fn raw(text: &str, confidence: f32) -> RawRecognition {
        RawRecognition {
            text: text.to_string(),
            confidence: Some(confidence),
            words: Vec::new(),
        }
    }

    #[async_trait]
    impl RecognitionEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn recognize(
            &mut self,
            image: &EncodedImage,
            params: &EngineParams,
        ) -> Result<RawRecognition, OcrError> {
            self.calls.push(params.clone());
            (self.script)(image, params)
        }

        async fn shutdown(&mut self) -> Result<(), OcrError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_shutdown {
                return Err(OcrError::RecognitionFailure("shutdown".to_string()));
            }
            Ok(())
        }
    }
}
