use serde::Serialize;

/// Result text stored for a ticket whose LLM output could not be post-processed.
pub const OUTPUT_FORMAT_ERROR: &str = "**ERROR IN LLM OUTPUT FORMAT**\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Attachment manifest or download failed before the LLM was called.
    Attachments(String),
    /// LLM call failed or was rate limited.
    Llm(String),
    /// LLM answered but the answer did not parse.
    MalformedOutput(String),
    /// The ticket folder or one of its artifact files could not be written.
    Artifacts(String),
}

impl FailureReason {
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::Attachments(_) => "attachments",
            FailureReason::Llm(_) => "llm",
            FailureReason::MalformedOutput(_) => "malformed_output",
            FailureReason::Artifacts(_) => "artifacts",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            FailureReason::Attachments(d)
            | FailureReason::Llm(d)
            | FailureReason::MalformedOutput(d)
            | FailureReason::Artifacts(d) => d,
        }
    }

    /// Text persisted as the ticket's result.
    pub fn result_text(&self) -> &'static str {
        match self {
            FailureReason::MalformedOutput(_) => OUTPUT_FORMAT_ERROR,
            _ => "",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind(), self.detail())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketOutcome {
    Extracted { cleaned: String },
    Failed(FailureReason),
}

impl TicketOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, TicketOutcome::Failed(_))
    }

    pub fn result_text(&self) -> &str {
        match self {
            TicketOutcome::Extracted { cleaned } => cleaned,
            TicketOutcome::Failed(reason) => reason.result_text(),
        }
    }
}

/// A typed spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

/// One row of a run-level metrics sheet.
pub trait SheetRow {
    fn headers() -> &'static [&'static str];
    fn cells(&self) -> Vec<SheetValue>;
}

/// Entity-extraction metrics for one ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketMetrics {
    pub ticket: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Seconds spent downloading and converting attachments.
    pub time_to_ticket_to_text: f64,
    /// Seconds spent in the LLM call and post-processing.
    pub time_to_extract_entities: f64,
    pub cost: f64,
    pub error: bool,
}

impl SheetRow for TicketMetrics {
    fn headers() -> &'static [&'static str] {
        &[
            "ticket",
            "input_tokens",
            "output_tokens",
            "time_to_ticket_to_text",
            "time_to_extract_entities",
            "cost",
            "error",
        ]
    }

    fn cells(&self) -> Vec<SheetValue> {
        vec![
            SheetValue::Text(self.ticket.clone()),
            SheetValue::Number(self.input_tokens as f64),
            SheetValue::Number(self.output_tokens as f64),
            SheetValue::Number(self.time_to_ticket_to_text),
            SheetValue::Number(self.time_to_extract_entities),
            SheetValue::Number(self.cost),
            SheetValue::Bool(self.error),
        ]
    }
}

/// Subcategory-classification metrics for one ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationMetrics {
    pub ticket: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub time_to_get_subcategory: f64,
    pub description: String,
    pub assigned_subcategory: String,
    pub selected_subcategory: String,
    pub error: bool,
}

impl SheetRow for ClassificationMetrics {
    fn headers() -> &'static [&'static str] {
        &[
            "ticket",
            "input_tokens",
            "output_tokens",
            "cost",
            "time_to_get_subcategory",
            "description",
            "assigned_subcategory",
            "selected_subcategory",
            "error",
        ]
    }

    fn cells(&self) -> Vec<SheetValue> {
        vec![
            SheetValue::Text(self.ticket.clone()),
            SheetValue::Number(self.input_tokens as f64),
            SheetValue::Number(self.output_tokens as f64),
            SheetValue::Number(self.cost),
            SheetValue::Number(self.time_to_get_subcategory),
            SheetValue::Text(self.description.clone()),
            SheetValue::Text(self.assigned_subcategory.clone()),
            SheetValue::Text(self.selected_subcategory.clone()),
            SheetValue::Bool(self.error),
        ]
    }
}

/// Written next to the metrics sheet as `parameters_<ts>.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunParameters {
    pub regions: Option<Vec<String>>,
    pub start_date: String,
    pub end_date: String,
}
