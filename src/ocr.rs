//! Adaptive OCR over a pluggable engine, with Tesseract driven as a subprocess.

use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::language::{detect_text_language, ocr_language_for};
use crate::script::{pair_with_fallback, parse_osd, parse_osd_scripts, ScriptDetection};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The two OCR engine calls the adaptive pipeline needs.
pub trait OcrEngine {
    /// Orientation-and-script detection report for an image.
    fn osd(&self, image: &Path) -> Result<String, OcrError>;
    /// Recognized text using the given `+`-joined language packs.
    fn recognize(&self, image: &Path, languages: &str) -> Result<String, OcrError>;
}

/// Tesseract invoked through its command line.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    program: String,
    timeout: Duration,
}

impl TesseractCli {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            program: config.tesseract_cmd.clone(),
            timeout: config.timeout,
        }
    }
}

impl OcrEngine for TesseractCli {
    fn osd(&self, image: &Path) -> Result<String, OcrError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(image).arg("stdout").args(["--psm", "0"]);
        let output = run_command(cmd, &self.program, self.timeout)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn recognize(&self, image: &Path, languages: &str) -> Result<String, OcrError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(image).arg("stdout").args(["-l", languages]);
        let output = run_command(cmd, &self.program, self.timeout)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Run an external command with a wall-clock deadline. Output goes through
/// temp files so a chatty child never blocks on a full pipe.
pub(crate) fn run_command(
    mut cmd: Command,
    program: &str,
    timeout: Duration,
) -> Result<Output, OcrError> {
    let mut stdout_file = tempfile::tempfile()?;
    let mut stderr_file = tempfile::tempfile()?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file.try_clone()?))
        .stderr(Stdio::from(stderr_file.try_clone()?));

    let mut child = cmd.spawn().map_err(|source| OcrError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(OcrError::Timeout {
                program: program.to_string(),
                secs: timeout.as_secs(),
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let mut stdout = Vec::new();
    stdout_file.seek(SeekFrom::Start(0))?;
    stdout_file.read_to_end(&mut stdout)?;
    let mut stderr = Vec::new();
    stderr_file.seek(SeekFrom::Start(0))?;
    stderr_file.read_to_end(&mut stderr)?;

    if !status.success() {
        return Err(OcrError::Failed {
            program: program.to_string(),
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

/// Two-pass OCR: the first pass uses the pack implied by the detected
/// script, the second re-targets the pack using the language found in the
/// first pass's text.
pub struct AdaptiveOcr<E: OcrEngine> {
    engine: E,
    detect_language: fn(&str) -> String,
}

impl<E: OcrEngine> AdaptiveOcr<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            detect_language: detect_text_language,
        }
    }

    /// Swap the lexical language detector.
    pub fn with_language_detector(mut self, detect: fn(&str) -> String) -> Self {
        self.detect_language = detect;
        self
    }

    /// Dominant script of the image, `(Unknown, 0.0)` on any failure.
    pub fn detect_script(&self, image: &Path) -> ScriptDetection {
        match self.engine.osd(image) {
            Ok(report) => parse_osd(&report).unwrap_or_else(|| {
                debug!(image = %image.display(), "OSD report had no script line");
                ScriptDetection::UNKNOWN
            }),
            Err(e) => {
                warn!(image = %image.display(), error = %e, "script detection failed");
                ScriptDetection::UNKNOWN
            }
        }
    }

    /// Up to `top_n` scripts ranked by confidence, empty on any failure.
    pub fn detect_top_scripts(&self, image: &Path, top_n: usize) -> Vec<ScriptDetection> {
        match self.engine.osd(image) {
            Ok(report) => {
                let mut scripts = parse_osd_scripts(&report);
                scripts.truncate(top_n);
                scripts
            }
            Err(e) => {
                warn!(image = %image.display(), error = %e, "script detection failed");
                Vec::new()
            }
        }
    }

    /// Never fails: engine errors degrade to the best text obtained so far.
    pub fn image_to_text(&self, image: &Path) -> String {
        let detection = self.detect_script(image);
        let first_languages = pair_with_fallback(detection.script.ocr_language());

        let first_pass = match self.engine.recognize(image, &first_languages) {
            Ok(text) => text,
            Err(e) => {
                warn!(image = %image.display(), languages = %first_languages, error = %e, "first OCR pass failed");
                String::new()
            }
        };

        let detected = (self.detect_language)(&first_pass);
        let second_languages = pair_with_fallback(ocr_language_for(&detected));
        debug!(
            image = %image.display(),
            script = %detection.script,
            confidence = detection.confidence,
            first = %first_languages,
            detected = %detected,
            second = %second_languages,
            "adaptive OCR languages"
        );

        match self.engine.recognize(image, &second_languages) {
            Ok(text) => text,
            Err(e) => {
                warn!(image = %image.display(), languages = %second_languages, error = %e, "second OCR pass failed, keeping first pass");
                first_pass
            }
        }
    }
}
