//! Header-row detection over an untyped grid (CSV / worksheet loaded without
//! a header), with removal of banner rows above and summary rows below.

use crate::error::TableError;
use serde_json::{Map, Value};

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedTable {
    /// 0-based index of the header row in the input grid.
    pub header_row: usize,
    pub headers: Vec<String>,
    pub records: Vec<Record>,
}

/// Empty strings count as missing, like an empty CSV field.
fn is_null(cell: &Value) -> bool {
    match cell {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// True when strictly more than half of `width` cells are filled.
fn mostly_filled(row: &[Value], width: usize) -> bool {
    let filled = row.iter().take(width).filter(|c| !is_null(c)).count();
    filled * 2 > width
}

fn header_text(cell: &Value, col: usize) -> String {
    match cell {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => format!("Unnamed: {col}"),
    }
}

/// Header names, with repeats suffixed `.1`, `.2`, ...
fn unique_headers(row: &[Value], width: usize) -> Vec<String> {
    let mut headers: Vec<String> = Vec::with_capacity(width);
    for col in 0..width {
        let base = header_text(row.get(col).unwrap_or(&Value::Null), col);
        let mut name = base.clone();
        let mut n = 1;
        while headers.contains(&name) {
            name = format!("{base}.{n}");
            n += 1;
        }
        headers.push(name);
    }
    headers
}

/// Locate the header row and return the data rows as ordered records.
///
/// The header is the first row with more than 50% non-null cells; every row
/// above it is discarded, and every data row at or below 50% is dropped as a
/// summary/footer row. A grid with no such row is an error.
pub fn detect_table(grid: &[Vec<Value>]) -> Result<DetectedTable, TableError> {
    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return Err(TableError::Empty);
    }

    let header_row = grid
        .iter()
        .position(|row| mostly_filled(row, width))
        .ok_or(TableError::NoHeaderRow { columns: width })?;
    let headers = unique_headers(&grid[header_row], width);

    let records = grid[header_row + 1..]
        .iter()
        .filter(|row| mostly_filled(row, width))
        .map(|row| {
            headers
                .iter()
                .enumerate()
                .map(|(col, name)| {
                    let cell = row.get(col).cloned().unwrap_or(Value::Null);
                    let cell = if is_null(&cell) { Value::Null } else { cell };
                    (name.clone(), cell)
                })
                .collect::<Record>()
        })
        .collect();

    Ok(DetectedTable {
        header_row,
        headers,
        records,
    })
}
