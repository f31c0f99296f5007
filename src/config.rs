//! Runtime configuration, read once from a `KEY=VALUE` secrets file and the
//! process environment, then handed to each client constructor.

use crate::error::ConfigError;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

const DEFAULT_TICKET_TABLE: &str = "sn_customerservice_case";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_PDF_DPI: u32 = 200;

#[derive(Clone)]
pub struct AzureOpenAiConfig {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub api_key: String,
}

impl fmt::Debug for AzureOpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureOpenAiConfig")
            .field("endpoint", &self.endpoint)
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .field("api_key", &"***")
            .finish()
    }
}

#[derive(Clone)]
pub struct SnowConfig {
    pub base_url: String,
    pub api_key: String,
    pub ticket_table: String,
}

impl fmt::Debug for SnowConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("ticket_table", &self.ticket_table)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub tesseract_cmd: String,
    pub pdftoppm_cmd: String,
    pub timeout: Duration,
    pub pdf_dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_cmd: "tesseract".to_string(),
            pdftoppm_cmd: "pdftoppm".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            pdf_dpi: DEFAULT_PDF_DPI,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub azure: AzureOpenAiConfig,
    pub snow: SnowConfig,
    pub ocr: OcrConfig,
    pub http_timeout: Duration,
}

impl AppConfig {
    /// Values in the secrets file win over the process environment.
    pub fn load(secrets_path: &Path) -> Result<Self, ConfigError> {
        let read_err = |source| ConfigError::Read {
            path: secrets_path.display().to_string(),
            source,
        };
        let mut vars: HashMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        for item in dotenvy::from_path_iter(secrets_path).map_err(read_err)? {
            let (key, value) = item.map_err(read_err)?;
            vars.insert(key, value);
        }
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let azure = AzureOpenAiConfig {
            endpoint: required(vars, "AZURE_OPENAI_ENDPOINT")?
                .trim_end_matches('/')
                .to_string(),
            deployment: required(vars, "AZURE_OPENAI_DEPLOYMENT")?,
            api_version: required(vars, "AZURE_OPENAI_API_VERSION")?,
            api_key: required(vars, "AZURE_OPENAI_API_KEY")?,
        };
        let snow = SnowConfig {
            base_url: required(vars, "SNOW_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            api_key: required(vars, "SNOW_API_KEY")?,
            ticket_table: optional(vars, "SNOW_TICKET_TABLE")
                .unwrap_or_else(|| DEFAULT_TICKET_TABLE.to_string()),
        };
        let defaults = OcrConfig::default();
        let ocr = OcrConfig {
            tesseract_cmd: optional(vars, "TESSERACT_CMD").unwrap_or(defaults.tesseract_cmd),
            pdftoppm_cmd: optional(vars, "PDFTOPPM_CMD").unwrap_or(defaults.pdftoppm_cmd),
            timeout: Duration::from_secs(parsed(vars, "OCR_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?),
            pdf_dpi: parsed(vars, "PDF_DPI", DEFAULT_PDF_DPI)?,
        };
        Ok(AppConfig {
            azure,
            snow,
            ocr,
            http_timeout: Duration::from_secs(parsed(vars, "HTTP_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?),
        })
    }
}

fn optional(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(vars: &HashMap<String, String>, key: &'static str) -> Result<String, ConfigError> {
    optional(vars, key).ok_or(ConfigError::Missing(key))
}

fn parsed<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match optional(vars, key) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_vars() -> HashMap<String, String> {
        [
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com/"),
            ("AZURE_OPENAI_DEPLOYMENT", "gpt-4o"),
            ("AZURE_OPENAI_API_VERSION", "2024-06-01"),
            ("AZURE_OPENAI_API_KEY", "secret-key"),
            ("SNOW_BASE_URL", "https://snow.example.com"),
            ("SNOW_API_KEY", "snow-key"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn builds_with_defaults() {
        let config = AppConfig::from_vars(&base_vars()).unwrap();
        assert_eq!(config.azure.endpoint, "https://example.openai.azure.com");
        assert_eq!(config.snow.ticket_table, DEFAULT_TICKET_TABLE);
        assert_eq!(config.ocr.tesseract_cmd, "tesseract");
        assert_eq!(config.ocr.timeout, Duration::from_secs(120));
        assert_eq!(config.ocr.pdf_dpi, 200);
    }

    #[test]
    fn missing_key_is_reported_by_name() {
        let mut vars = base_vars();
        vars.remove("SNOW_API_KEY");
        match AppConfig::from_vars(&vars) {
            Err(ConfigError::Missing(key)) => assert_eq!(key, "SNOW_API_KEY"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let mut vars = base_vars();
        vars.insert("OCR_TIMEOUT_SECS".into(), "soon".into());
        assert!(matches!(
            AppConfig::from_vars(&vars),
            Err(ConfigError::Invalid { key: "OCR_TIMEOUT_SECS", .. })
        ));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = AppConfig::from_vars(&base_vars()).unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret-key"));
        assert!(!printed.contains("snow-key"));
    }

    #[test]
    fn loads_secrets_file_with_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# Azure").unwrap();
        for (k, v) in base_vars() {
            writeln!(file, "{k}={v}").unwrap();
        }
        writeln!(file).unwrap();
        writeln!(file, "PDF_DPI=300").unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.ocr.pdf_dpi, 300);
        assert_eq!(config.azure.deployment, "gpt-4o");
    }
}
