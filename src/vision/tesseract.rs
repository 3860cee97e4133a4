//! Tesseract command line backend
//!
//! Each recognition writes the PNG into a private scratch directory and runs
//! `tesseract <png> stdout ... tsv`. The TSV rows carry per-word confidences only, so the
//! aggregate confidence is left to the word-mean fallback.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{EngineParams, EngineSettings};
use crate::error::OcrError;
use crate::vision::ocr::{OcrWord, RawRecognition, RecognitionEngine};
use crate::vision::pipeline::EncodedImage;

/// TSV row level for words
const WORD_LEVEL: i32 = 5;

/// Tesseract CLI engine
pub struct TesseractEngine {
    executable: PathBuf,
    tessdata_dir: Option<PathBuf>,
    language: String,
    timeout: Duration,
    version: String,
    /// Scratch directory, removed on shutdown or drop
    workdir: Option<TempDir>,
    calls: u64,
}

impl TesseractEngine {
    /// Locate the executable, check it runs, and create the scratch directory
    pub async fn start(settings: &EngineSettings) -> Result<Self, OcrError> {
        let executable = settings
            .executable
            .clone()
            .unwrap_or_else(|| PathBuf::from("tesseract"));

        let output = Command::new(&executable)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                OcrError::EngineUnavailable(format!("{}: {}", executable.display(), e))
            })?;

        if !output.status.success() {
            return Err(OcrError::EngineUnavailable(format!(
                "{} --version exited with {}",
                executable.display(),
                output.status
            )));
        }

        // Older builds print the banner on stderr
        let banner = if output.stdout.is_empty() {
            &output.stderr
        } else {
            &output.stdout
        };
        let version = String::from_utf8_lossy(banner)
            .lines()
            .next()
            .unwrap_or("tesseract")
            .trim()
            .to_string();

        let workdir = tempfile::Builder::new().prefix("card-ocr-").tempdir()?;
        info!(
            "Tesseract ready: {} (language {}, scratch {})",
            version,
            settings.language,
            workdir.path().display()
        );

        Ok(Self::from_parts(executable, settings, version, Some(workdir)))
    }

    fn from_parts(
        executable: PathBuf,
        settings: &EngineSettings,
        version: String,
        workdir: Option<TempDir>,
    ) -> Self {
        Self {
            executable,
            tessdata_dir: settings.tessdata_dir.clone(),
            language: settings.language.clone(),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
            version,
            workdir,
            calls: 0,
        }
    }

    /// Command line arguments for one call
    fn build_args(&self, input: &Path, params: &EngineParams) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            input.into(),
            "stdout".into(),
            "-l".into(),
            self.language.clone().into(),
            "--psm".into(),
            params.segmentation_mode.to_string().into(),
            "--dpi".into(),
            params.dpi.to_string().into(),
        ];

        if let Some(dir) = &self.tessdata_dir {
            args.push("--tessdata-dir".into());
            args.push(dir.into());
        }

        // An empty whitelist means no restriction
        if let Some(whitelist) = params.char_whitelist.as_deref().filter(|w| !w.is_empty()) {
            args.push("-c".into());
            args.push(format!("tessedit_char_whitelist={}", whitelist).into());
        }

        args.push("-c".into());
        args.push(
            format!(
                "preserve_interword_spaces={}",
                u8::from(params.preserve_interword_spaces)
            )
            .into(),
        );

        args.push("tsv".into());
        args
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(
        &mut self,
        image: &EncodedImage,
        params: &EngineParams,
    ) -> Result<RawRecognition, OcrError> {
        params.validate()?;

        let Some(workdir) = self.workdir.as_ref() else {
            return Err(OcrError::EngineUnavailable(
                "engine has been shut down".to_string(),
            ));
        };
        let input = workdir.path().join(format!("input-{:05}.png", self.calls + 1));
        self.calls += 1;
        tokio::fs::write(&input, &image.bytes).await?;

        let args = self.build_args(&input, params);
        debug!(
            "Running {} on {}x{} image (psm {}, dpi {})",
            self.executable.display(),
            image.width,
            image.height,
            params.segmentation_mode,
            params.dpi
        );

        let run = Command::new(&self.executable)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let result = tokio::time::timeout(self.timeout, run).await;
        if let Err(e) = tokio::fs::remove_file(&input).await {
            debug!("Could not remove {}: {}", input.display(), e);
        }

        let output = result
            .map_err(|_| {
                OcrError::RecognitionFailure(format!("timed out after {:?}", self.timeout))
            })?
            .map_err(|e| OcrError::RecognitionFailure(format!("failed to run tesseract: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::RecognitionFailure(format!(
                "{} exited with {}: {}",
                self.version,
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn shutdown(&mut self) -> Result<(), OcrError> {
        if let Some(workdir) = self.workdir.take() {
            debug!("Removing Tesseract scratch dir {}", workdir.path().display());
            workdir.close()?;
            info!("{} shut down after {} calls", self.version, self.calls);
        }
        Ok(())
    }
}

impl Drop for TesseractEngine {
    fn drop(&mut self) {
        if self.workdir.is_some() {
            warn!("Tesseract engine dropped without shutdown; scratch dir removed on drop");
        }
    }
}

/// Parse Tesseract TSV output into words and reconstructed text
///
/// Words on the same (block, paragraph, line) are joined with spaces; lines with newlines.
/// Rows with confidence -1 are structural and skipped.
pub fn parse_tsv(tsv: &str) -> RawRecognition {
    let mut words: Vec<OcrWord> = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut current_line: Vec<&str> = Vec::new();

    for row in tsv.lines().skip(1) {
        // level, page_num, block_num, par_num, line_num, word_num,
        // left, top, width, height, conf, text
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let level: i32 = fields[0].parse().unwrap_or(-1);
        if level != WORD_LEVEL {
            continue;
        }
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let text = fields[11].trim();
        if conf < 0.0 || text.is_empty() {
            continue;
        }

        let key = (
            fields[2].parse().unwrap_or(-1),
            fields[3].parse().unwrap_or(-1),
            fields[4].parse().unwrap_or(-1),
        );
        if current_key != Some(key) {
            if !current_line.is_empty() {
                lines.push(current_line.join(" "));
                current_line.clear();
            }
            current_key = Some(key);
        }

        current_line.push(text);
        words.push(OcrWord {
            text: text.to_string(),
            confidence: conf,
        });
    }

    // Don't forget the last line
    if !current_line.is_empty() {
        lines.push(current_line.join(" "));
    }

    RawRecognition {
        text: lines.join("\n"),
        confidence: None,
        words,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t
2\t1\t1\t0\t0\t0\t20\t20\t300\t60\t-1\t
4\t1\t1\t1\t1\t0\t20\t20\t300\t25\t-1\t
5\t1\t1\t1\t1\t1\t20\t20\t100\t25\t91.5\tSV01-023
5\t1\t1\t1\t1\t2\t130\t20\t80\t25\t88.5\tRARE
4\t1\t1\t1\t2\t0\t20\t50\t300\t25\t-1\t
5\t1\t1\t1\t2\t1\t20\t50\t120\t25\t70\tPikachu
5\t1\t1\t1\t2\t2\t150\t50\t10\t25\t-1\t
";

    fn engine(settings: &EngineSettings) -> TesseractEngine {
        TesseractEngine::from_parts(
            PathBuf::from("tesseract"),
            settings,
            "tesseract 5.5.0".to_string(),
            None,
        )
    }

    #[test]
    fn test_parse_tsv_lines_and_words() {
        let raw = parse_tsv(SAMPLE_TSV);

        assert_eq!(raw.text, "SV01-023 RARE\nPikachu");
        assert_eq!(raw.words.len(), 3);
        assert!(raw.confidence.is_none());
        assert!((raw.resolved_confidence() - 83.333).abs() < 0.01);
    }

    #[test]
    fn test_parse_tsv_empty() {
        let raw = parse_tsv("level\tpage_num\n");
        assert!(raw.text.is_empty());
        assert!(raw.words.is_empty());
        assert_eq!(raw.resolved_confidence(), 0.0);
    }

    #[test]
    fn test_parse_tsv_skips_short_rows() {
        let raw = parse_tsv("header\n5\t1\t1\n5\t1\t1\t1\t1\t1\t0\t0\t1\t1\t50\tOK\n");
        assert_eq!(raw.text, "OK");
    }

    #[test]
    fn test_build_args() {
        let settings = EngineSettings {
            tessdata_dir: Some(PathBuf::from("/opt/tessdata")),
            ..EngineSettings::default()
        };
        let engine = engine(&settings);
        let params = EngineParams {
            segmentation_mode: 7,
            char_whitelist: Some("0123456789".to_string()),
            preserve_interword_spaces: false,
            dpi: 300,
        };

        let args: Vec<String> = engine
            .build_args(Path::new("/tmp/in.png"), &params)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "/tmp/in.png",
                "stdout",
                "-l",
                "eng",
                "--psm",
                "7",
                "--dpi",
                "300",
                "--tessdata-dir",
                "/opt/tessdata",
                "-c",
                "tessedit_char_whitelist=0123456789",
                "-c",
                "preserve_interword_spaces=0",
                "tsv",
            ]
        );
    }

    #[test]
    fn test_build_args_without_whitelist() {
        let engine = engine(&EngineSettings::default());
        let params = EngineParams {
            char_whitelist: Some(String::new()),
            ..EngineParams::default()
        };
        let args: Vec<String> = engine
            .build_args(Path::new("in.png"), &params)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(!args.iter().any(|a| a.starts_with("tessedit_char_whitelist")));
        assert!(args.contains(&"preserve_interword_spaces=1".to_string()));
    }

    #[tokio::test]
    async fn test_start_missing_executable() {
        let settings = EngineSettings {
            executable: Some(PathBuf::from("/nonexistent/bin/tesseract")),
            ..EngineSettings::default()
        };
        let err = TesseractEngine::start(&settings).await.err().unwrap();
        assert!(matches!(err, OcrError::EngineUnavailable(_)));
    }

    #[tokio::test]
    async fn test_recognize_after_shutdown() {
        let mut engine = engine(&EngineSettings::default());
        engine.shutdown().await.unwrap();

        let image = EncodedImage {
            bytes: vec![0],
            width: 1,
            height: 1,
        };
        let err = engine
            .recognize(&image, &EngineParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::EngineUnavailable(_)));
    }

    #[tokio::test]
    async fn test_recognize_rejects_bad_params() {
        let mut engine = engine(&EngineSettings::default());
        let image = EncodedImage {
            bytes: vec![0],
            width: 1,
            height: 1,
        };
        let params = EngineParams {
            segmentation_mode: 42,
            ..EngineParams::default()
        };
        let err = engine.recognize(&image, &params).await.unwrap_err();
        assert!(matches!(err, OcrError::EngineConfiguration(_)));
    }
}
