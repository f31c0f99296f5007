use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read secrets file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: dotenvy::Error,
    },
    #[error("{0} not set in secrets file or environment")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Failures of the external OCR / rasterizer processes.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },
    #[error("{program} produced no page images")]
    NoPages { program: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("table has no rows")]
    Empty,
    #[error("no row has more than half of its {columns} cells filled, header row not found")]
    NoHeaderRow { columns: usize },
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("could not parse CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not open spreadsheet: {0}")]
    Spreadsheet(#[from] calamine::Error),
    #[error("workbook has no worksheets")]
    NoWorksheet,
    #[error("invalid docx archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("invalid docx XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("could not serialize table: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("LLM output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("LLM output has no \"{0}\" list")]
    MissingKey(&'static str),
    #[error("record {index} is not a list")]
    NotAList { index: usize },
    #[error("record {index} has {len} fields, expected at least 3")]
    TooShort { index: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LLM rate limit reached: {0}")]
    RateLimited(String),
    #[error("LLM returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("LLM output truncated after {output_tokens} tokens")]
    Truncated {
        partial: String,
        input_tokens: u64,
        output_tokens: u64,
    },
    #[error("LLM response has no choices")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum SnowError {
    #[error("ticketing API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ticketing API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not write attachment {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum CostError {
    #[error("model '{model}' not recognized. Available models: {available}")]
    UnknownModel { model: String, available: String },
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("history lock poisoned")]
    Poisoned,
}

/// Errors that abort a whole run. Per-ticket failures never surface here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Snow(#[from] SnowError),
    #[error(transparent)]
    Cost(#[from] CostError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("run {0} not found in run history")]
    UnknownRun(i64),
    #[error("could not write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write metrics workbook: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
