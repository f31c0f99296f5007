//! Lexical language identification of OCR output.

use crate::script::ENGLISH;
use lingua::{LanguageDetector, LanguageDetectorBuilder};
use once_cell::sync::Lazy;

/// Returned when the text gives no usable evidence.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

static DETECTOR: Lazy<LanguageDetector> =
    Lazy::new(|| LanguageDetectorBuilder::from_all_languages().build());

/// ISO 639-3 code of the dominant language, or [`UNKNOWN_LANGUAGE`].
pub fn detect_text_language(text: &str) -> String {
    if text.trim().is_empty() {
        return UNKNOWN_LANGUAGE.to_string();
    }
    match DETECTOR.detect_language_of(text) {
        Some(language) => language.iso_code_639_3().to_string(),
        None => UNKNOWN_LANGUAGE.to_string(),
    }
}

/// Tesseract pack name for an ISO 639-3 code. Most packs share the code.
pub fn ocr_language_for(code: &str) -> &str {
    match code {
        "" | UNKNOWN_LANGUAGE => ENGLISH,
        "zho" => "chi_sim",
        "nob" | "nno" => "nor",
        other => other,
    }
}
