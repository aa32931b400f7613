//! Schema Inference - column types from a bounded sample, plus header naming

use crate::ingestion::cell::{CellValue, Row};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

lazy_static! {
    static ref BOOLEAN_PATTERN: Regex = Regex::new(r"(?i)^(true|false|t|f|1|0)$").unwrap();
    static ref DATE_PATTERN: Regex = Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap();
    static ref INTEGER_PATTERN: Regex = Regex::new(r"^-?[0-9]+$").unwrap();
    static ref FLOAT_PATTERN: Regex = Regex::new(r"^-?[0-9]+\.[0-9]+$").unwrap();
}

/// Name of the synthetic identity column every destination table carries.
pub const ROW_ID_COLUMN: &str = "_row_id";

/// Longest identifier the warehouse keeps without truncating.
const MAX_IDENTIFIER_LEN: usize = 63;

/// The fixed type lattice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Text,
    Bigint,
    Float,
    Boolean,
    Date,
}

impl ColumnType {
    /// Warehouse column type used in DDL and parameter casts.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Bigint => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "TEXT",
            ColumnType::Bigint => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
        };
        f.write_str(name)
    }
}

/// One destination column, as persisted on the job record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    #[serde(rename = "name")]
    pub sanitized_name: String,
    pub original_name: String,
    #[serde(rename = "type")]
    pub inferred_type: ColumnType,
}

/// Per-column capability flags. Once cleared a flag stays cleared.
#[derive(Clone, Copy, Debug)]
pub struct TypeFlags {
    pub is_boolean: bool,
    pub is_date: bool,
    pub is_integer: bool,
    pub is_float: bool,
    pub observed: bool,
}

impl Default for TypeFlags {
    fn default() -> Self {
        Self {
            is_boolean: true,
            is_date: true,
            is_integer: true,
            is_float: true,
            observed: false,
        }
    }
}

impl TypeFlags {
    pub fn observe(&mut self, value: &str) {
        self.observed = true;
        if self.is_boolean && !BOOLEAN_PATTERN.is_match(value) {
            self.is_boolean = false;
        }
        if self.is_date && !is_iso_date(value) {
            self.is_date = false;
        }
        let digits = INTEGER_PATTERN.is_match(value);
        // digit runs past the BIGINT range still cast to DOUBLE PRECISION
        if self.is_integer && !(digits && value.parse::<i64>().is_ok()) {
            self.is_integer = false;
        }
        if self.is_float && !digits && !FLOAT_PATTERN.is_match(value) {
            self.is_float = false;
        }
    }

    pub fn resolve(&self) -> ColumnType {
        if !self.observed {
            ColumnType::Text
        } else if self.is_boolean {
            ColumnType::Boolean
        } else if self.is_date {
            ColumnType::Date
        } else if self.is_integer {
            ColumnType::Bigint
        } else if self.is_float {
            ColumnType::Float
        } else {
            ColumnType::Text
        }
    }
}

fn is_iso_date(value: &str) -> bool {
    DATE_PATTERN.is_match(value) && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// Type Inference Engine
pub struct SchemaInference {
    flags: Vec<TypeFlags>,
    rows_seen: usize,
}

impl SchemaInference {
    pub fn new(column_count: usize) -> Self {
        Self {
            flags: vec![TypeFlags::default(); column_count],
            rows_seen: 0,
        }
    }

    /// Feed one sampled data row. Cells past the header width are ignored.
    pub fn observe_row(&mut self, row: &[CellValue]) {
        self.rows_seen += 1;
        for (flags, cell) in self.flags.iter_mut().zip(row) {
            if let Some(text) = cell.as_text() {
                flags.observe(&text);
            }
        }
    }

    pub fn rows_seen(&self) -> usize {
        self.rows_seen
    }

    pub fn resolve(&self) -> Vec<ColumnType> {
        self.flags.iter().map(TypeFlags::resolve).collect()
    }
}

/// Convenience over [`SchemaInference`] for an in-memory sample.
pub fn infer_column_types(column_count: usize, sample: &[Row]) -> Vec<ColumnType> {
    let mut inference = SchemaInference::new(column_count);
    for row in sample {
        inference.observe_row(row);
    }
    inference.resolve()
}

/// Identifier-safe form of a header cell: lowercase `[a-z0-9_]`, never empty.
pub fn sanitize_column_name(original: &str, position: usize) -> String {
    let trimmed = original.trim();
    if trimmed.is_empty() {
        return format!("column_{}", position + 1);
    }
    let mut name: String = trimmed
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' })
        .collect();
    name.truncate(MAX_IDENTIFIER_LEN);
    name
}

/// Header texts for a header row; blank cells become empty strings.
pub fn header_names(header: &[CellValue]) -> Vec<String> {
    header
        .iter()
        .map(|cell| cell.as_text().unwrap_or_default())
        .collect()
}

/// Pair header names with inferred types, making sanitized names unique.
///
/// A name already taken (by an earlier column or the synthetic key) gets
/// the smallest free `_<n>` suffix, n >= 2.
pub fn build_columns(headers: &[String], types: &[ColumnType]) -> Vec<ColumnMetadata> {
    let mut taken: HashSet<String> = HashSet::new();
    taken.insert(ROW_ID_COLUMN.to_string());

    headers
        .iter()
        .zip(types)
        .enumerate()
        .map(|(position, (original, inferred_type))| {
            let base = sanitize_column_name(original, position);
            let sanitized_name = unique_name(&base, &taken);
            taken.insert(sanitized_name.clone());
            ColumnMetadata {
                sanitized_name,
                original_name: original.trim().to_string(),
                inferred_type: *inferred_type,
            }
        })
        .collect()
}

fn unique_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2usize..)
        .map(|n| {
            let suffix = format!("_{}", n);
            let mut stem = base.to_string();
            stem.truncate(MAX_IDENTIFIER_LEN - suffix.len());
            stem + &suffix
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_rows(rows: &[&[&str]]) -> Vec<Row> {
        rows.iter()
            .map(|r| r.iter().map(|v| CellValue::Text(v.to_string())).collect())
            .collect()
    }

    #[test]
    fn test_scenario_a_types() {
        let sample = text_rows(&[
            &["1", "10.5", "true", "2024-01-01"],
            &["2", "3", "false", "2024-02-29"],
            &["3", "-7.25", "TRUE", "2023-12-31"],
        ]);
        assert_eq!(
            infer_column_types(4, &sample),
            vec![ColumnType::Bigint, ColumnType::Float, ColumnType::Boolean, ColumnType::Date]
        );
    }

    #[test]
    fn test_boolean_accepts_short_forms_and_digits() {
        let sample = text_rows(&[&["t"], &["F"], &["1"], &["0"]]);
        assert_eq!(infer_column_types(1, &sample), vec![ColumnType::Boolean]);
    }

    #[test]
    fn test_boolean_plus_date_is_text_unless_all_dates() {
        let mixed = text_rows(&[&["true"], &["false"], &["2024-01-01"]]);
        assert_eq!(infer_column_types(1, &mixed), vec![ColumnType::Text]);

        let dates = text_rows(&[&["2024-01-01"], &["2024-01-02"]]);
        assert_eq!(infer_column_types(1, &dates), vec![ColumnType::Date]);
    }

    #[test]
    fn test_invalid_calendar_date_is_not_date() {
        let sample = text_rows(&[&["2024-02-30"]]);
        assert_eq!(infer_column_types(1, &sample), vec![ColumnType::Text]);
    }

    #[test]
    fn test_integer_then_float_then_text() {
        assert_eq!(infer_column_types(1, &text_rows(&[&["12"], &["-4"]])), vec![ColumnType::Bigint]);
        assert_eq!(infer_column_types(1, &text_rows(&[&["12"], &["4.5"]])), vec![ColumnType::Float]);
        assert_eq!(infer_column_types(1, &text_rows(&[&["12"], &["4.5"], &["n/a"]])), vec![ColumnType::Text]);
        assert_eq!(infer_column_types(1, &text_rows(&[&["1e5"]])), vec![ColumnType::Text]);
        assert_eq!(infer_column_types(1, &text_rows(&[&[".5"]])), vec![ColumnType::Text]);
    }

    #[test]
    fn test_non_ascii_digits_are_text() {
        assert_eq!(infer_column_types(1, &text_rows(&[&["١٢"], &["٣"]])), vec![ColumnType::Text]);
        assert_eq!(infer_column_types(1, &text_rows(&[&["١.٥"]])), vec![ColumnType::Text]);
        assert_eq!(infer_column_types(1, &text_rows(&[&["٢٠٢٤-٠١-٠١"]])), vec![ColumnType::Text]);
        assert_eq!(infer_column_types(1, &text_rows(&[&["１２"]])), vec![ColumnType::Text]);
    }

    #[test]
    fn test_integers_past_bigint_range_are_float() {
        let sample = text_rows(&[&["12"], &["100000000000000000000"]]);
        assert_eq!(infer_column_types(1, &sample), vec![ColumnType::Float]);
        assert_eq!(
            infer_column_types(1, &text_rows(&[&["9223372036854775807"], &["-9223372036854775808"]])),
            vec![ColumnType::Bigint]
        );

        let native = vec![vec![CellValue::Float(1e20)], vec![CellValue::Int(3)]];
        assert_eq!(infer_column_types(1, &native), vec![ColumnType::Float]);
    }

    #[test]
    fn test_blank_cells_ignored_and_empty_column_is_text() {
        let sample = text_rows(&[&["", "5"], &["  ", ""], &["", "6"]]);
        assert_eq!(infer_column_types(2, &sample), vec![ColumnType::Text, ColumnType::Bigint]);
        assert_eq!(infer_column_types(3, &[]), vec![ColumnType::Text; 3]);
    }

    #[test]
    fn test_native_cells_normalized_to_text() {
        let sample = vec![
            vec![CellValue::Int(3), CellValue::Float(2.5), CellValue::Bool(true)],
            vec![
                CellValue::Int(4),
                CellValue::Int(2),
                CellValue::Bool(false),
            ],
        ];
        assert_eq!(
            infer_column_types(3, &sample),
            vec![ColumnType::Bigint, ColumnType::Float, ColumnType::Boolean]
        );
        let dates = vec![vec![CellValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())]];
        assert_eq!(infer_column_types(1, &dates), vec![ColumnType::Date]);
    }

    #[test]
    fn test_flags_never_reset() {
        let mut flags = TypeFlags::default();
        flags.observe("abc");
        flags.observe("1");
        assert_eq!(flags.resolve(), ColumnType::Text);
    }

    #[test]
    fn test_sanitize_column_name() {
        assert_eq!(sanitize_column_name("Customer Name", 0), "customer_name");
        assert_eq!(sanitize_column_name("  Amount ($) ", 1), "amount____");
        assert_eq!(sanitize_column_name("Café", 2), "caf_");
        assert_eq!(sanitize_column_name("", 3), "column_4");
        assert_eq!(sanitize_column_name("   ", 0), "column_1");
        assert_eq!(sanitize_column_name(&"x".repeat(100), 0).len(), 63);
    }

    #[test]
    fn test_sanitized_names_only_safe_chars() {
        for raw in ["Ünïcode Ñame", "tab\there", "DROP TABLE;--", "ß", "", "日本"] {
            let name = sanitize_column_name(raw, 0);
            assert!(!name.is_empty());
            assert!(name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
                "{:?} -> {:?}", raw, name);
        }
    }

    #[test]
    fn test_build_columns_disambiguates_collisions() {
        let headers = vec![
            "Total Amount".to_string(),
            "total_amount".to_string(),
            "total-amount".to_string(),
            "_row_id".to_string(),
        ];
        let columns = build_columns(&headers, &[ColumnType::Text; 4]);
        let names: Vec<_> = columns.iter().map(|c| c.sanitized_name.as_str()).collect();
        assert_eq!(names, vec!["total_amount", "total_amount_2", "total_amount_3", "_row_id_2"]);
        assert_eq!(columns[0].original_name, "Total Amount");
    }

    #[test]
    fn test_column_metadata_json_shape() {
        let column = ColumnMetadata {
            sanitized_name: "joined".into(),
            original_name: "Joined".into(),
            inferred_type: ColumnType::Date,
        };
        let value = serde_json::to_value(&column).unwrap();
        assert_eq!(value, serde_json::json!({"name": "joined", "original_name": "Joined", "type": "DATE"}));
    }
}
