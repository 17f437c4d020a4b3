use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{PlanError, Result};
use crate::table::{Record, Table, Value};

lazy_static! {
    static ref MONTH_REGEX: Regex = Regex::new(r"^(\d{4})-(\d{1,2})$").unwrap();
}

/// One spending line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRow {
    pub date: Option<NaiveDate>,
    /// `YYYY-MM`
    pub month: String,
    pub category: String,
    pub amount: f64,
}

impl ExpenseRow {
    pub fn new(date: NaiveDate, category: impl Into<String>, amount: f64) -> Self {
        ExpenseRow {
            date: Some(date),
            month: month_key(date),
            category: category.into(),
            amount,
        }
    }

    // Amounts compare at cent precision
    fn identity(&self) -> (Option<NaiveDate>, String, String, i64) {
        (
            self.date,
            self.month.clone(),
            self.category.clone(),
            (self.amount * 100.0).round() as i64,
        )
    }
}

pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Normalise `2024-3` style month text to `2024-03`.
pub fn normalize_month(text: &str) -> Option<String> {
    let caps = MONTH_REGEX.captures(text.trim())?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some(format!("{:04}-{:02}", year, month))
}

/// The calendar month before `month` (`YYYY-MM`).
pub fn previous_month(month: &str) -> Option<String> {
    let month = normalize_month(month)?;
    let first = NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d").ok()?;
    first.pred_opt().map(month_key)
}

/// Rows read from one uploaded table plus the count of rows that could not be used.
#[derive(Clone, Debug, Default)]
pub struct ParsedExpenses {
    pub rows: Vec<ExpenseRow>,
    pub skipped: usize,
}

fn find_column<'a>(table: &'a Table, names: &[&str]) -> Option<&'a str> {
    table
        .columns
        .iter()
        .find(|c| names.iter().any(|n| c.trim().eq_ignore_ascii_case(n)))
        .map(String::as_str)
}

/// Read expense rows from a table with `Date` (or `Month`), `Category` and `Amount` columns.
pub fn expenses_from_table(table: &Table) -> Result<ParsedExpenses> {
    let date_col = find_column(table, &["date", "month"]).ok_or_else(|| {
        PlanError::missing_column(&table.name, "Date")
    })?;
    let category_col = find_column(table, &["category"])
        .ok_or_else(|| PlanError::missing_column(&table.name, "Category"))?;
    let amount_col = find_column(table, &["amount"])
        .ok_or_else(|| PlanError::missing_column(&table.name, "Amount"))?;

    let mut parsed = ParsedExpenses::default();
    for row in &table.rows {
        match parse_row(row, date_col, category_col, amount_col) {
            Some(expense) => parsed.rows.push(expense),
            None => parsed.skipped += 1,
        }
    }

    if parsed.skipped > 0 {
        log::warn!("{}: skipped {} unusable expense rows", table.name, parsed.skipped);
    }
    Ok(parsed)
}

fn parse_row(row: &Record, date_col: &str, category_col: &str, amount_col: &str) -> Option<ExpenseRow> {
    let category = row.get(category_col).map(Value::as_text)?;
    if category.is_empty() {
        return None;
    }
    let amount = row
        .get(amount_col)
        .and_then(|v| match v {
            Value::Text(s) => s.trim().trim_start_matches('$').replace(',', "").parse().ok(),
            other => other.as_f64(),
        })
        .filter(|a: &f64| a.is_finite())?;

    let when = row.get(date_col)?;
    let (date, month) = match when.as_date() {
        Some(d) => (Some(d), month_key(d)),
        None => (None, normalize_month(&when.as_text())?),
    };

    Some(ExpenseRow {
        date,
        month,
        category,
        amount,
    })
}

/// Result of merging new rows into the ledger.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MergeOutcome {
    pub added: usize,
    pub duplicates: usize,
}

/// All expense rows loaded so far, without exact duplicates.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExpenseLedger {
    rows: Vec<ExpenseRow>,
}

impl ExpenseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[ExpenseRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Append rows, dropping any that exactly match a row already present.
    pub fn merge(&mut self, rows: impl IntoIterator<Item = ExpenseRow>) -> MergeOutcome {
        let mut seen: HashSet<_> = self.rows.iter().map(ExpenseRow::identity).collect();
        let mut outcome = MergeOutcome::default();
        for row in rows {
            if seen.insert(row.identity()) {
                self.rows.push(row);
                outcome.added += 1;
            } else {
                outcome.duplicates += 1;
            }
        }
        outcome
    }

    /// Sum of amounts per `(month, category)`.
    pub fn monthly_totals(&self) -> BTreeMap<(String, String), f64> {
        let mut totals = BTreeMap::new();
        for row in &self.rows {
            *totals
                .entry((row.month.clone(), row.category.clone()))
                .or_insert(0.0) += row.amount;
        }
        totals
    }

    pub fn months(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.month.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn categories(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn latest_month(&self) -> Option<String> {
        self.rows.iter().map(|r| r.month.clone()).max()
    }

    pub fn category_totals(&self, month: &str) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for row in self.rows.iter().filter(|r| r.month == month) {
            *totals.entry(row.category.clone()).or_insert(0.0) += row.amount;
        }
        totals
    }

    pub fn month_total(&self, month: &str) -> f64 {
        self.category_totals(month).values().sum()
    }
}

/// Per-month totals for display.
#[derive(Clone, Debug, Serialize)]
pub struct LedgerSummary {
    pub rows: usize,
    pub months: Vec<String>,
    pub categories: Vec<String>,
    pub totals: Vec<MonthCategoryTotal>,
}

#[derive(Clone, Debug, Serialize)]
pub struct MonthCategoryTotal {
    pub month: String,
    pub category: String,
    pub total: f64,
}

impl From<&ExpenseLedger> for LedgerSummary {
    fn from(ledger: &ExpenseLedger) -> Self {
        LedgerSummary {
            rows: ledger.len(),
            months: ledger.months(),
            categories: ledger.categories(),
            totals: ledger
                .monthly_totals()
                .into_iter()
                .map(|((month, category), total)| MonthCategoryTotal {
                    month,
                    category,
                    total,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::read_csv;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn reads_rows_with_any_header_case() {
        let csv = b"DATE,category,Amount\n2024-03-01,Groceries,\"$1,250.50\"\n2024-03-02,,10\n2024-03-03,Rent,abc\n2024-3,Fuel,40\n";
        let table = read_csv("march.csv", csv).unwrap();
        let parsed = expenses_from_table(&table).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.skipped, 2);
        assert_eq!(parsed.rows[0].amount, 1250.5);
        assert_eq!(parsed.rows[0].month, "2024-03");
        assert_eq!(parsed.rows[1].date, None);
        assert_eq!(parsed.rows[1].month, "2024-03");
    }

    #[test]
    fn huge_serial_date_is_skipped() {
        let table = read_csv("bad.csv", b"Date,Category,Amount\n1000000000000,Food,12\n45366,Food,8\n").unwrap();
        let parsed = expenses_from_table(&table).unwrap();
        assert_eq!(parsed.skipped, 1);
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].month, "2024-03");
    }

    #[test]
    fn missing_amount_column_is_an_error() {
        let table = read_csv("x.csv", b"Date,Category\n2024-03-01,Food\n").unwrap();
        let err = expenses_from_table(&table).unwrap_err();
        assert!(err.to_string().contains("Amount"));
    }

    #[test]
    fn merge_drops_exact_duplicates_only() {
        let mut ledger = ExpenseLedger::new();
        let first = ledger.merge(vec![
            ExpenseRow::new(d(2024, 3, 1), "Food", 12.5),
            ExpenseRow::new(d(2024, 3, 1), "Food", 12.5),
        ]);
        assert_eq!(first, MergeOutcome { added: 1, duplicates: 1 });

        let second = ledger.merge(vec![
            ExpenseRow::new(d(2024, 3, 1), "Food", 12.5),
            ExpenseRow::new(d(2024, 3, 1), "Food", 12.51),
            ExpenseRow::new(d(2024, 3, 2), "Food", 12.5),
        ]);
        assert_eq!(second, MergeOutcome { added: 2, duplicates: 1 });
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn totals_group_by_month_and_category() {
        let mut ledger = ExpenseLedger::new();
        ledger.merge(vec![
            ExpenseRow::new(d(2024, 2, 10), "Food", 100.0),
            ExpenseRow::new(d(2024, 3, 1), "Food", 20.0),
            ExpenseRow::new(d(2024, 3, 5), "Food", 30.0),
            ExpenseRow::new(d(2024, 3, 5), "Rent", 900.0),
        ]);
        let totals = ledger.monthly_totals();
        assert_eq!(totals[&("2024-03".to_string(), "Food".to_string())], 50.0);
        assert_eq!(ledger.months(), vec!["2024-02", "2024-03"]);
        assert_eq!(ledger.latest_month().as_deref(), Some("2024-03"));
        assert_eq!(ledger.month_total("2024-03"), 950.0);
        assert_eq!(ledger.category_totals("2024-02").len(), 1);
    }

    #[test]
    fn previous_month_crosses_years() {
        assert_eq!(previous_month("2024-03").as_deref(), Some("2024-02"));
        assert_eq!(previous_month("2024-1").as_deref(), Some("2023-12"));
        assert_eq!(previous_month("March"), None);
    }
}
