use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{PlanError, Result};

/// A single loosely typed cell value as read from a worksheet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Empty cells and blank strings both count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Empty => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric view of the value; numeric text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Text view of the value, trimmed. Whole numbers print without a fraction.
    pub fn as_text(&self) -> String {
        self.to_string().trim().to_string()
    }

    /// Date view of the value. Numbers are taken as Excel serial dates.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Number(n) => serial_to_date(*n),
            Value::Text(s) => parse_date_text(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Text(s) => write!(f, "{}", s),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

/// Serial of 9999-12-31, the last date Excel can represent.
pub const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

fn excel_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).expect("valid epoch")
}

/// Convert an Excel serial date (1900 date system) to a calendar date.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..MAX_EXCEL_SERIAL + 1.0).contains(&serial) {
        return None;
    }
    let days = Duration::try_days(serial.floor() as i64)?;
    excel_epoch().checked_add_signed(days)
}

/// Convert a calendar date to its Excel serial number.
pub fn date_to_serial(date: NaiveDate) -> f64 {
    (date - excel_epoch()).num_days() as f64
}

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    // ISO timestamps carry a time part after the date
    let head = s.split(['T', ' ']).next().unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, "%m/%d/%Y"))
        .or_else(|_| NaiveDate::parse_from_str(head, "%d.%m.%Y"))
        .ok()
}

/// Parse free text from csv input: numbers become numbers, blanks become empty.
pub fn parse_number_or_text(s: &str) -> Value {
    let s = s.trim();
    if s.is_empty() {
        Value::Empty
    } else if let Ok(n) = s.parse::<f64>() {
        Value::Number(n)
    } else {
        Value::Text(s.to_string())
    }
}

/// One table row keyed by column name.
pub type Record = HashMap<String, Value>;

/// Ordered columns plus rows of records, the in-memory form of a worksheet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    /// Sheet the table was read from, used in error messages
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Table {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Add the column (empty in every row) if it is not already present.
    pub fn ensure_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }

    pub fn drop_columns(&mut self, columns: &[&str]) {
        self.columns.retain(|c| !columns.contains(&c.as_str()));
        for row in &mut self.rows {
            for c in columns {
                row.remove(*c);
            }
        }
    }

    pub fn push(&mut self, record: Record) {
        for key in record.keys() {
            if !self.has_column(key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(record);
    }

    /// Fail with the first of `columns` missing from the table.
    pub fn require_columns(&self, columns: &[&str]) -> Result<()> {
        match columns.iter().find(|c| !self.has_column(c)) {
            Some(missing) => Err(PlanError::missing_column(&self.name, missing)),
            None => Ok(()),
        }
    }

    pub fn get<'a>(&'a self, row: usize, column: &str) -> Option<&'a Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// New table with exactly `columns`, in that order. Missing cells become empty.
    pub fn project(&self, columns: &[String]) -> Table {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect();

        Table {
            name: self.name.clone(),
            columns: columns.to_vec(),
            rows,
        }
    }

    /// Values of one row in column order.
    pub fn row_values(&self, row: usize) -> Vec<Value> {
        let record = &self.rows[row];
        self.columns
            .iter()
            .map(|c| record.get(c).cloned().unwrap_or_default())
            .collect()
    }
}

/// Build a record from `(column, value)` pairs.
pub fn record<I, K, V>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_numbers_display_without_fraction() {
        assert_eq!(Value::Number(42.0).to_string(), "42");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Empty.to_string(), "");
    }

    #[test]
    fn serial_dates_round_trip_known_values() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(date_to_serial(d), 45366.0);
        assert_eq!(serial_to_date(45366.0), Some(d));
        assert_eq!(serial_to_date(45366.75), Some(d));
        assert_eq!(serial_to_date(0.0), None);
    }

    #[test]
    fn out_of_range_serials_are_not_dates() {
        let last = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        assert_eq!(serial_to_date(MAX_EXCEL_SERIAL), Some(last));
        assert_eq!(serial_to_date(1e12), None);
        assert_eq!(serial_to_date(f64::MAX), None);
        assert_eq!(Value::Number(1e12).as_date(), None);
    }

    #[test]
    fn text_dates_are_parsed() {
        let d = NaiveDate::from_ymd_opt(2025, 1, 7).unwrap();
        assert_eq!(Value::text("2025-01-07").as_date(), Some(d));
        assert_eq!(Value::text("2025-01-07T00:00:00").as_date(), Some(d));
        assert_eq!(Value::text("01/07/2025").as_date(), Some(d));
        assert_eq!(Value::text("soon").as_date(), None);
    }

    #[test]
    fn project_fills_missing_columns() {
        let mut table = Table::new("t", vec!["a".into()]);
        table.push(record([("a", "1")]));
        let projected = table.project(&["b".to_string(), "a".to_string()]);
        assert_eq!(projected.columns, vec!["b", "a"]);
        assert_eq!(projected.row_values(0), vec![Value::Empty, Value::text("1")]);
    }

    #[test]
    fn require_columns_names_the_missing_one() {
        let table = Table::new("Export", vec!["Division".into()]);
        let err = table.require_columns(&["Division", "Build Qtr"]).unwrap_err();
        assert_eq!(err.to_string(), "column 'Build Qtr' not found in sheet 'Export'");
    }
}
