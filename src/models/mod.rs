mod ticket_result;

pub use ticket_result::{
    ClassificationMetrics, FailureReason, RunParameters, SheetRow, SheetValue, TicketMetrics,
    TicketOutcome, OUTPUT_FORMAT_ERROR,
};
