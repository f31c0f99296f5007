use calamine::{open_workbook_auto, Data, DataType, Reader};
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet, XlsxError};
use serde_json::{Number, Value};
use std::path::Path;

use crate::error::ConvertError;
use crate::json::to_pretty_json;
use crate::models::{SheetRow, SheetValue};
use crate::services::detect_table;

/// Load a CSV or Excel-family file as an untyped grid, no header assumed.
pub fn load_grid(path: &Path) -> Result<Vec<Vec<Value>>, ConvertError> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if is_csv {
        read_csv_grid(path)
    } else {
        read_workbook_grid(path)
    }
}

/// Rows may have different lengths; the table detector pads them.
fn read_csv_grid(path: &Path) -> Result<Vec<Vec<Value>>, ConvertError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record?;
        grid.push(record.iter().map(csv_cell).collect());
    }
    Ok(grid)
}

/// First worksheet of an xls/xlsx/xlsb/ods workbook.
fn read_workbook_grid(path: &Path) -> Result<Vec<Vec<Value>>, ConvertError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ConvertError::NoWorksheet)??;
    Ok(range
        .rows()
        .map(|row| row.iter().map(workbook_cell).collect())
        .collect())
}

/// Numbers are inferred the way a CSV reader with type sniffing would.
fn csv_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

fn float_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Dates and durations are not JSON-native; they become strings.
fn workbook_cell(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => float_value(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) => Value::String(s.clone()),
        Data::DateTime(_) => Value::String(
            cell.as_datetime()
                .map(|dt| dt.to_string())
                .unwrap_or_else(|| cell.to_string()),
        ),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
    }
}

/// Detect the table in a CSV/Excel file and render its records as JSON.
pub fn tabular_to_text(path: &Path) -> Result<String, ConvertError> {
    let grid = load_grid(path)?;
    let table = detect_table(&grid)?;
    Ok(to_pretty_json(&table.records)?)
}

/// Remove or replace characters that can corrupt the sheet XML.
/// Drops control chars (except tab, newline, CR).
fn sanitize_cell(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let u = c as u32;
            c == '\t' || c == '\n' || c == '\r' || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect()
}

fn write_text_cell_safe(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    text: &str,
    format: &Format,
) -> Result<(), XlsxError> {
    let cleaned = sanitize_cell(text);
    worksheet.write_string_with_format(row, col, &cleaned, format).map(|_| ())
}

/// Estimate column width from text length (char count × 1.2, clamped 10–50).
fn estimate_text_width(text: &str) -> f64 {
    let w = text.chars().count() as f64 * 1.2;
    w.clamp(10.0, 50.0)
}

fn column_widths<R: SheetRow>(rows: &[R]) -> Vec<f64> {
    let mut widths: Vec<f64> = R::headers().iter().map(|h| estimate_text_width(h)).collect();
    for row in rows {
        for (col, cell) in row.cells().iter().enumerate() {
            if let (SheetValue::Text(t), Some(w)) = (cell, widths.get_mut(col)) {
                *w = w.max(estimate_text_width(t));
            }
        }
    }
    widths
}

/// Write one header row plus one row per entry, in the given order.
pub fn write_metrics_workbook<R: SheetRow>(
    path: &Path,
    sheet_name: &str,
    rows: &[R],
) -> Result<(), XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0x2563EB))
        .set_font_color(Color::RGB(0xFFFFFF));
    let text_format = Format::new().set_text_wrap();
    let number_format = Format::new().set_align(FormatAlign::Right);

    for (col, w) in column_widths(rows).into_iter().enumerate() {
        worksheet.set_column_width(col as u16, w)?;
    }
    for (col, header) in R::headers().iter().enumerate() {
        write_text_cell_safe(worksheet, 0, col as u16, header, &header_format)?;
    }
    for (idx, entry) in rows.iter().enumerate() {
        let row = (idx + 1) as u32;
        for (col, cell) in entry.cells().into_iter().enumerate() {
            let col = col as u16;
            match cell {
                SheetValue::Text(t) => write_text_cell_safe(worksheet, row, col, &t, &text_format)?,
                SheetValue::Number(n) => {
                    worksheet.write_number_with_format(row, col, n, &number_format)?;
                }
                SheetValue::Bool(b) => {
                    worksheet.write_boolean(row, col, b)?;
                }
            }
        }
    }

    worksheet.set_freeze_panes(1, 0)?;
    workbook.save(path)?;
    Ok(())
}
