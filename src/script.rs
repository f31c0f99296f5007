//! Writing-system detection from Tesseract's orientation-and-script report,
//! and the script → OCR language pack table.

use once_cell::sync::Lazy;
use regex::Regex;

pub const ENGLISH: &str = "eng";
/// Secondary pack paired with English.
pub const CJK_FALLBACK: &str = "chi_sim";

static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Script: ([a-zA-Z]+)\r?\n").expect("script regex"));
static CONFIDENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Script confidence: (\d+\.?\d*)").expect("confidence regex"));
static SCRIPT_PAIR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Script: ([a-zA-Z]+)\r?\nScript confidence: (\d+\.?\d*)").expect("pair regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    Latin,
    Cyrillic,
    Arabic,
    Devanagari,
    Greek,
    Hebrew,
    Hangul,
    Han,
    Katakana,
    Tamil,
    Bengali,
    Thai,
    Unknown,
}

impl Script {
    pub const KNOWN: [Script; 12] = [
        Script::Latin,
        Script::Cyrillic,
        Script::Arabic,
        Script::Devanagari,
        Script::Greek,
        Script::Hebrew,
        Script::Hangul,
        Script::Han,
        Script::Katakana,
        Script::Tamil,
        Script::Bengali,
        Script::Thai,
    ];

    /// Scripts Tesseract reports outside the table (e.g. "Japanese") map to `Unknown`.
    pub fn from_osd_name(name: &str) -> Script {
        Script::KNOWN
            .iter()
            .copied()
            .find(|s| s.as_str() == name)
            .unwrap_or(Script::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Script::Latin => "Latin",
            Script::Cyrillic => "Cyrillic",
            Script::Arabic => "Arabic",
            Script::Devanagari => "Devanagari",
            Script::Greek => "Greek",
            Script::Hebrew => "Hebrew",
            Script::Hangul => "Hangul",
            Script::Han => "Han",
            Script::Katakana => "Katakana",
            Script::Tamil => "Tamil",
            Script::Bengali => "Bengali",
            Script::Thai => "Thai",
            Script::Unknown => "Unknown",
        }
    }

    /// Primary Tesseract language pack for this script.
    pub fn ocr_language(self) -> &'static str {
        match self {
            Script::Latin => ENGLISH,
            Script::Cyrillic => "rus",
            Script::Arabic => "ara",
            Script::Devanagari => "hin",
            Script::Greek => "ell",
            Script::Hebrew => "heb",
            Script::Hangul => "kor",
            Script::Han => CJK_FALLBACK,
            Script::Katakana => "jpn",
            Script::Tamil => "tam",
            Script::Bengali => "ben",
            Script::Thai => "tha",
            Script::Unknown => ENGLISH,
        }
    }
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptDetection {
    pub script: Script,
    /// In `[0, 1)`, rescaled from Tesseract's unbounded score.
    pub confidence: f32,
}

impl ScriptDetection {
    pub const UNKNOWN: ScriptDetection = ScriptDetection {
        script: Script::Unknown,
        confidence: 0.0,
    };
}

/// `raw / (1 + raw)`: keeps the ranking of Tesseract scores.
fn normalize_confidence(raw: f32) -> f32 {
    let raw = raw.max(0.0);
    raw / (1.0 + raw)
}

/// Parse the `Script:` / `Script confidence:` lines of an OSD report.
pub fn parse_osd(report: &str) -> Option<ScriptDetection> {
    let name = SCRIPT_RE.captures(report)?.get(1)?.as_str();
    let confidence = CONFIDENCE_RE
        .captures(report)?
        .get(1)?
        .as_str()
        .parse::<f32>()
        .ok()?;
    Some(ScriptDetection {
        script: Script::from_osd_name(name),
        confidence: normalize_confidence(confidence),
    })
}

/// Every script/confidence pair in the report, highest confidence first.
pub fn parse_osd_scripts(report: &str) -> Vec<ScriptDetection> {
    let mut found: Vec<ScriptDetection> = SCRIPT_PAIR_RE
        .captures_iter(report)
        .filter_map(|caps| {
            let confidence = caps.get(2)?.as_str().parse::<f32>().ok()?;
            Some(ScriptDetection {
                script: Script::from_osd_name(caps.get(1)?.as_str()),
                confidence: normalize_confidence(confidence),
            })
        })
        .collect();
    found.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    found
}

/// Tesseract `-l` value for a primary pack: English is paired with the CJK
/// pack, anything else with English.
pub fn pair_with_fallback(primary: &str) -> String {
    let primary = if primary.trim().is_empty() {
        ENGLISH
    } else {
        primary.trim()
    };
    if primary == ENGLISH {
        format!("{ENGLISH}+{CJK_FALLBACK}")
    } else {
        format!("{primary}+{ENGLISH}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OSD_REPORT: &str = "Page number: 0\n\
        Orientation in degrees: 0\n\
        Rotate: 0\n\
        Orientation confidence: 7.16\n\
        Script: Cyrillic\n\
        Script confidence: 2.33\n";

    #[test]
    fn parses_script_and_confidence() {
        let detection = parse_osd(OSD_REPORT).unwrap();
        assert_eq!(detection.script, Script::Cyrillic);
        assert!((detection.confidence - 2.33 / 3.33).abs() < 1e-6);
    }

    #[test]
    fn confidence_stays_in_unit_range() {
        for raw in ["0", "0.4", "1", "12.5", "999"] {
            let report = format!("Script: Latin\nScript confidence: {raw}\n");
            let c = parse_osd(&report).unwrap().confidence;
            assert!((0.0..1.0).contains(&c), "{raw} -> {c}");
        }
        assert_eq!(parse_osd("Script: Latin\nScript confidence: 0\n").unwrap().confidence, 0.0);
    }

    #[test]
    fn unparseable_report_is_none() {
        assert_eq!(parse_osd("Too few characters. Skipping this page"), None);
        assert_eq!(parse_osd("Script: Latin\n"), None);
    }

    #[test]
    fn names_outside_table_are_unknown() {
        let detection = parse_osd("Script: Japanese\nScript confidence: 4.0\n").unwrap();
        assert_eq!(detection.script, Script::Unknown);
        assert_eq!(detection.script.ocr_language(), ENGLISH);
    }

    #[test]
    fn top_scripts_sorted_by_confidence() {
        let report = "Script: Latin\nScript confidence: 1.5\nScript: Greek\nScript confidence: 3\n";
        let scripts = parse_osd_scripts(report);
        assert_eq!(scripts.len(), 2);
        assert_eq!(scripts[0].script, Script::Greek);
        assert_eq!(scripts[1].script, Script::Latin);
        assert!((scripts[0].confidence - 0.75).abs() < 1e-6);
        assert!((scripts[1].confidence - 0.6).abs() < 1e-6);
        assert!(parse_osd_scripts("garbage").is_empty());
    }

    #[test]
    fn pairing_rule_holds_for_every_script() {
        for script in Script::KNOWN.iter().copied().chain([Script::Unknown]) {
            let primary = script.ocr_language();
            let pair = pair_with_fallback(primary);
            let parts: Vec<&str> = pair.split('+').collect();
            assert_eq!(parts.len(), 2, "{pair}");
            assert_eq!(parts[0], primary);
            if primary == ENGLISH {
                assert_eq!(parts[1], CJK_FALLBACK);
            } else {
                assert_eq!(parts[1], ENGLISH);
            }
            assert_eq!(parts.iter().filter(|p| **p == ENGLISH).count(), 1, "{pair}");
        }
    }

    #[test]
    fn empty_primary_defaults_to_english() {
        assert_eq!(pair_with_fallback(""), "eng+chi_sim");
        assert_eq!(pair_with_fallback("rus"), "rus+eng");
    }
}
