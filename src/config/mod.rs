//! Application Configuration
//!
//! Engine settings, preprocessing parameters, the auto-tune grid and the zone template,
//! stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::OcrError;

/// Characters accepted by default for whole-card recognition
pub const DEFAULT_WHITELIST: &str =
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-/().,% ";

/// Longest side (px) of the reference frame used for cropping and recognition
pub const DEFAULT_MAX_SIDE: u32 = 1600;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Recognition engine process settings
    pub engine: EngineSettings,
    /// One-shot whole-image recognition
    pub recognition: RecognitionSettings,
    /// Auto-tune grid
    pub autotune: SearchSpace,
    /// Zone layout of the card template
    pub template: ZoneTemplate,
}

impl AppConfig {
    /// Check everything that would otherwise fail halfway through a run
    pub fn validate(&self) -> Result<(), OcrError> {
        self.recognition.params.validate()?;
        check_max_side(self.recognition.max_side, "recognition")?;
        self.autotune.validate()?;
        self.template.validate()
    }
}

/// Settings for the Tesseract backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Tesseract executable; `tesseract` from PATH when unset
    pub executable: Option<PathBuf>,
    /// Directory holding `<language>.traineddata`
    pub tessdata_dir: Option<PathBuf>,
    /// Recognition language
    pub language: String,
    /// Upper bound for a single recognition call
    pub timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            executable: None,
            tessdata_dir: None,
            language: "eng".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Parameters handed to the engine together with each image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    /// Page segmentation mode (Tesseract `--psm`, 0-13)
    pub segmentation_mode: u8,
    /// Only these characters may be recognized; everything when unset
    pub char_whitelist: Option<String>,
    /// Keep runs of spaces between words
    pub preserve_interword_spaces: bool,
    /// Resolution hint for the engine
    pub dpi: u32,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            segmentation_mode: 6, // Single uniform block of text
            char_whitelist: Some(DEFAULT_WHITELIST.to_string()),
            preserve_interword_spaces: true,
            dpi: 300,
        }
    }
}

impl EngineParams {
    /// Single-line params with a custom whitelist
    pub fn single_line(whitelist: &str) -> Self {
        Self {
            segmentation_mode: 7,
            char_whitelist: Some(whitelist.to_string()),
            ..Self::default()
        }
    }

    /// Reject values the engine cannot accept
    pub fn validate(&self) -> Result<(), OcrError> {
        if self.segmentation_mode > 13 {
            return Err(OcrError::EngineConfiguration(format!(
                "segmentation mode {} is outside 0-13",
                self.segmentation_mode
            )));
        }
        if !(70..=2400).contains(&self.dpi) {
            return Err(OcrError::EngineConfiguration(format!(
                "dpi {} is outside 70-2400",
                self.dpi
            )));
        }
        if let Some(whitelist) = &self.char_whitelist {
            if whitelist.chars().any(char::is_control) {
                return Err(OcrError::EngineConfiguration(
                    "whitelist contains control characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Binarization level, or no binarization
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "ThresholdRepr", into = "ThresholdRepr")]
pub enum Threshold {
    #[default]
    Off,
    At(f32),
}

impl Threshold {
    pub fn level(self) -> Option<f32> {
        match self {
            Threshold::Off => None,
            Threshold::At(level) => Some(level),
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Off => write!(f, "none"),
            Threshold::At(level) => write!(f, "{}", level),
        }
    }
}

impl From<Option<f32>> for Threshold {
    fn from(level: Option<f32>) -> Self {
        level.map_or(Threshold::Off, Threshold::At)
    }
}

// TOML has no null, so "none" is spelled out
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ThresholdRepr {
    Level(f32),
    Keyword(String),
}

impl TryFrom<ThresholdRepr> for Threshold {
    type Error = String;

    fn try_from(repr: ThresholdRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ThresholdRepr::Level(level) => Ok(Threshold::At(level)),
            ThresholdRepr::Keyword(word) => match word.to_ascii_lowercase().as_str() {
                "none" | "off" => Ok(Threshold::Off),
                other => Err(format!("expected a number or \"none\", got \"{}\"", other)),
            },
        }
    }
}

impl From<Threshold> for ThresholdRepr {
    fn from(threshold: Threshold) -> Self {
        match threshold {
            Threshold::Off => ThresholdRepr::Keyword("none".to_string()),
            Threshold::At(level) => ThresholdRepr::Level(level),
        }
    }
}

/// Preprocessing applied to a zone crop or to the whole image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Longest side of the resize reference frame
    pub max_side: u32,
    /// Median kernel size (odd, 1 disables)
    pub median_kernel_size: u32,
    /// Linear contrast multiplier
    pub contrast_multiplier: f32,
    /// Value added after the multiplier
    pub offset: f32,
    /// Binarization level
    pub threshold: Threshold,
    /// Invert after binarization
    pub invert: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_side: DEFAULT_MAX_SIDE,
            median_kernel_size: 3,
            contrast_multiplier: 1.0,
            offset: 0.0,
            threshold: Threshold::Off,
            invert: false,
        }
    }
}

/// A rectangle as fractions (0.0-1.0) of the resized image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl NormalizedRect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Describe the first violated bound, if any
    pub fn bounds_violation(&self) -> Option<String> {
        let unit = 0.0..=1.0;
        for (label, value) in [("x", self.x), ("y", self.y), ("w", self.w), ("h", self.h)] {
            if !unit.contains(&value) {
                return Some(format!("{} = {} is outside [0, 1]", label, value));
            }
        }
        if self.x + self.w > 1.0 + f32::EPSILON {
            return Some(format!("x + w = {} exceeds 1", self.x + self.w));
        }
        if self.y + self.h > 1.0 + f32::EPSILON {
            return Some(format!("y + h = {} exceeds 1", self.y + self.h));
        }
        None
    }
}

impl fmt::Display for NormalizedRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(x={:.3}, y={:.3}, w={:.3}, h={:.3})",
            self.x, self.y, self.w, self.h
        )
    }
}

/// A named region of the card template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpec {
    /// Unique zone name, used as the result key
    pub name: String,
    /// Region relative to the resized card
    pub rect: NormalizedRect,
    /// Engine parameters for this zone
    #[serde(default)]
    pub engine: EngineParams,
    /// Filters for this zone
    #[serde(default)]
    pub preprocess: PreprocessConfig,
}

/// What happens to the batch when one zone fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record an empty, zero-confidence result and continue
    #[default]
    Isolate,
    /// Stop at the first failing zone
    Abort,
}

/// The zone layout of one template family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneTemplate {
    pub failure_policy: FailurePolicy,
    pub zones: Vec<ZoneSpec>,
}

impl Default for ZoneTemplate {
    fn default() -> Self {
        let upper = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-/";
        let words = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-'.,!& ";

        let text_zone = PreprocessConfig {
            median_kernel_size: 3,
            contrast_multiplier: 1.4,
            offset: -20.0,
            threshold: Threshold::At(140.0),
            ..PreprocessConfig::default()
        };

        Self {
            failure_policy: FailurePolicy::Isolate,
            zones: vec![
                ZoneSpec {
                    name: "code".to_string(),
                    rect: NormalizedRect::new(0.05, 0.03, 0.35, 0.06),
                    engine: EngineParams::single_line(upper),
                    preprocess: text_zone.clone(),
                },
                ZoneSpec {
                    name: "name".to_string(),
                    rect: NormalizedRect::new(0.10, 0.10, 0.80, 0.08),
                    engine: EngineParams::single_line(words),
                    preprocess: PreprocessConfig {
                        threshold: Threshold::Off,
                        contrast_multiplier: 1.2,
                        ..text_zone.clone()
                    },
                },
                ZoneSpec {
                    name: "left".to_string(),
                    rect: NormalizedRect::new(0.05, 0.78, 0.40, 0.10),
                    engine: EngineParams::default(),
                    preprocess: text_zone.clone(),
                },
                ZoneSpec {
                    name: "right".to_string(),
                    rect: NormalizedRect::new(0.55, 0.78, 0.40, 0.10),
                    engine: EngineParams::default(),
                    preprocess: text_zone.clone(),
                },
                ZoneSpec {
                    name: "date".to_string(),
                    rect: NormalizedRect::new(0.60, 0.92, 0.35, 0.05),
                    engine: EngineParams::single_line("0123456789/.-"),
                    preprocess: PreprocessConfig {
                        median_kernel_size: 1,
                        ..text_zone
                    },
                },
            ],
        }
    }
}

impl ZoneTemplate {
    /// Names must be unique and non-empty
    ///
    /// Rectangles outside the unit square only produce a warning. Per-zone engine params and
    /// frame sizes are checked when the zone runs, so the failure policy applies to them.
    pub fn validate(&self) -> Result<(), OcrError> {
        validate_zones(&self.zones)
    }
}

/// Validate an ordered zone list before any work starts
pub fn validate_zones(zones: &[ZoneSpec]) -> Result<(), OcrError> {
    let mut seen = HashSet::new();
    for zone in zones {
        if zone.name.trim().is_empty() {
            return Err(OcrError::InvalidConfig("zone name must not be empty".to_string()));
        }
        if !seen.insert(zone.name.as_str()) {
            return Err(OcrError::InvalidConfig(format!(
                "duplicate zone name \"{}\"",
                zone.name
            )));
        }
        if let Some(problem) = zone.rect.bounds_violation() {
            warn!("Zone \"{}\" rect {}: {}", zone.name, zone.rect, problem);
        }
    }
    Ok(())
}

fn check_max_side(max_side: u32, owner: &str) -> Result<(), OcrError> {
    if max_side == 0 {
        return Err(OcrError::InvalidConfig(format!("{}: max_side must be > 0", owner)));
    }
    Ok(())
}

/// One-shot whole-image recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Longest side the image is scaled down to
    pub max_side: u32,
    /// Engine parameters for the whole image (also used by auto-tune)
    pub params: EngineParams,
    /// Optional filters; the scaled image is sent as-is when unset
    pub preprocess: Option<PreprocessConfig>,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            max_side: DEFAULT_MAX_SIDE,
            params: EngineParams::default(),
            preprocess: None,
        }
    }
}

/// Grid searched by the auto-tuner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpace {
    /// Contrast multipliers (outermost loop)
    pub multipliers: Vec<f32>,
    /// Offsets (middle loop)
    pub offsets: Vec<f32>,
    /// Thresholds (innermost loop)
    pub thresholds: Vec<Threshold>,
    /// Longest side of the whole-image frame
    pub max_side: u32,
    /// Stop as soon as the best score reaches this
    pub stop_score: f32,
    /// Median kernel, fixed for every trial
    pub median_kernel_size: u32,
    /// Inversion, fixed for every trial
    pub invert: bool,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            multipliers: vec![1.0, 1.2, 1.4, 1.6, 1.8],
            offsets: vec![-60.0, -40.0, -20.0, 0.0, 20.0],
            thresholds: vec![
                Threshold::Off,
                Threshold::At(120.0),
                Threshold::At(140.0),
                Threshold::At(160.0),
            ],
            max_side: DEFAULT_MAX_SIDE,
            stop_score: 95.0,
            median_kernel_size: 1,
            invert: false,
        }
    }
}

impl SearchSpace {
    /// Number of combinations in the grid
    pub fn total_trials(&self) -> usize {
        self.multipliers.len() * self.offsets.len() * self.thresholds.len()
    }

    pub fn validate(&self) -> Result<(), OcrError> {
        check_max_side(self.max_side, "autotune")
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
