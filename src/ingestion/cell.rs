//! Raw cell values as produced by the row streams, and the cleaned values
//! handed to the warehouse.

use chrono::NaiveDate;
use serde_json::Value;

/// One cell as read from the source file.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    /// Structured value with no native scalar form (e.g. a spreadsheet error
    /// cell or a hyperlink with display text).
    Object(Value),
}

/// One physical row, cells in column order.
pub type Row = Vec<CellValue>;

impl CellValue {
    /// Null, or a string that is blank after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Textual form used by type inference and header naming. `None` for blanks.
    pub fn as_text(&self) -> Option<String> {
        match self.clean() {
            CleanValue::Null => None,
            CleanValue::Text(s) => Some(s),
            CleanValue::Int(i) => Some(i.to_string()),
            CleanValue::Float(f) => Some(f.to_string()),
            CleanValue::Bool(b) => Some(b.to_string()),
        }
    }

    /// Value cleaning applied to every cell before batching.
    pub fn clean(&self) -> CleanValue {
        match self {
            CellValue::Empty => CleanValue::Null,
            CellValue::Text(s) => clean_text(s),
            CellValue::Int(i) => CleanValue::Int(*i),
            CellValue::Float(f) => CleanValue::Float(*f),
            CellValue::Bool(b) => CleanValue::Bool(*b),
            CellValue::Date(d) => CleanValue::Text(d.format("%Y-%m-%d").to_string()),
            CellValue::Object(v) => clean_object(v),
        }
    }
}

/// Returns true when every cell of the row is blank.
pub fn is_blank_row(row: &[CellValue]) -> bool {
    row.iter().all(CellValue::is_blank)
}

/// A cell after cleaning; what actually gets bound into an INSERT.
#[derive(Clone, Debug, PartialEq)]
pub enum CleanValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl CleanValue {
    /// Text representation bound as a statement parameter; the warehouse
    /// casts it to the column type.
    pub fn to_sql_text(&self) -> Option<String> {
        match self {
            CleanValue::Null => None,
            CleanValue::Text(s) => Some(s.clone()),
            CleanValue::Int(i) => Some(i.to_string()),
            CleanValue::Float(f) => Some(f.to_string()),
            CleanValue::Bool(b) => Some(b.to_string()),
        }
    }
}

fn clean_text(s: &str) -> CleanValue {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        CleanValue::Null
    } else {
        CleanValue::Text(trimmed.to_string())
    }
}

fn clean_object(value: &Value) -> CleanValue {
    match value {
        Value::Null => CleanValue::Null,
        Value::Bool(b) => CleanValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => CleanValue::Int(i),
            None => n.as_f64().map(CleanValue::Float).unwrap_or(CleanValue::Null),
        },
        Value::String(s) => clean_text(s),
        Value::Object(map) => {
            // display text first, then a computed result
            for key in ["text", "result"] {
                if let Some(inner) = map.get(key) {
                    if !inner.is_null() {
                        return clean_object(inner);
                    }
                }
            }
            clean_text(&value.to_string())
        }
        Value::Array(_) => clean_text(&value.to_string()),
    }
}
