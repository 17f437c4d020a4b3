use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::Result;
use crate::quarter::{Quarter, QuarterWindow};
use crate::rules::PlanProfile;
use crate::table::{Record, Table, Value};

/// Row counts collected while turning an export into plan rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PlanStats {
    pub rows_read: usize,
    pub category_matches: usize,
    pub excluded: usize,
    pub outside_window: usize,
    pub kept: usize,
    pub without_shortcut: usize,
    pub without_workdays: usize,
}

/// Fresh plan rows computed from an export, ready to be reconciled.
#[derive(Clone, Debug)]
pub struct PlanBuild {
    pub table: Table,
    pub window: QuarterWindow,
    pub stats: PlanStats,
}

/// Transform the raw export into plan rows.
///
/// `shortcuts` maps the export's product names to short product names and
/// `workdays` carries the per-product stage durations.
///
/// # Arguments
/// * `export` - The export sheet read with its header in row 1
/// * `shortcuts` - Product name to short product name lookup
/// * `workdays` - Stage durations keyed by short product name
/// * `profile` - Filters, renames, window and derived column names
/// * `today` - Date that fixes the current quarter and the window
///
/// # Returns
/// * `Result<PlanBuild>` - Kept rows, the window and row counts, or
///   `MissingColumn` when an input lacks a required header
///
/// # Examples
/// ```no_run
/// use plansheet::loader::Workbook;
/// use plansheet::plan::build_plan_table;
/// use plansheet::PlanProfile;
///
/// let profile = PlanProfile::default();
/// let mut export = Workbook::from_bytes(std::fs::read("export.xlsx").unwrap()).unwrap();
/// let mut plan = Workbook::from_bytes(std::fs::read("plan.xlsx").unwrap()).unwrap();
/// let build = build_plan_table(
///     &export.sheet_table(&profile.export_sheet, 1).unwrap(),
///     &plan.sheet_table(&profile.shortcuts_sheet, 1).unwrap(),
///     &plan.sheet_table(&profile.workdays_sheet, 1).unwrap(),
///     &profile,
///     chrono::Local::now().date_naive(),
/// )
/// .unwrap();
/// println!("{} rows kept in {}", build.stats.kept, build.window);
/// ```
pub fn build_plan_table(
    export: &Table,
    shortcuts: &Table,
    workdays: &Table,
    profile: &PlanProfile,
    today: NaiveDate,
) -> Result<PlanBuild> {
    let mut required: Vec<&str> = profile.filters.iter().map(|f| f.column.as_str()).collect();
    required.push(&profile.product_column);
    required.push(&profile.join_key);
    required.push(&profile.window_column);
    required.extend(profile.quarter_columns.iter().map(String::as_str));
    export.require_columns(&required)?;

    shortcuts.require_columns(&[
        profile.product_column.as_str(),
        profile.shortcut_value_column.as_str(),
    ])?;
    let mut workday_columns = vec![profile.shortcut_value_column.as_str()];
    workday_columns.extend(profile.workdays.iter().map(|w| w.source.as_str()));
    workdays.require_columns(&workday_columns)?;

    let window = QuarterWindow::ahead(today, profile.window_quarters);
    let current = Quarter::containing(today);
    let shortcut_lookup = first_by_key(shortcuts, &profile.product_column);
    let workday_lookup = first_by_key(workdays, &profile.shortcut_value_column);

    let mut stats = PlanStats {
        rows_read: export.len(),
        ..PlanStats::default()
    };
    let mut table = Table::new(export.name.clone(), export.columns.clone());
    for column in &profile.quarter_columns {
        table.ensure_column(&PlanProfile::year_column(column));
        table.ensure_column(&PlanProfile::quarter_column(column));
    }
    table.ensure_column(&profile.revenue_column);
    table.ensure_column(&profile.shortcut_value_column);
    for column in &profile.placeholder_columns {
        table.ensure_column(column);
    }
    for wd in &profile.workdays {
        table.ensure_column(&wd.target);
    }

    for source in &export.rows {
        if !matches_filters(source, profile) {
            continue;
        }
        stats.category_matches += 1;

        let mut row = source.clone();
        let product = profile.rename_product(&text_of(&row, &profile.product_column));
        if profile.is_excluded(&product) {
            stats.excluded += 1;
            continue;
        }
        row.insert(profile.product_column.clone(), Value::Text(product.clone()));
        map_build_complete(&mut row, &profile.build_complete_column);

        for column in &profile.quarter_columns {
            let text = text_of(&row, column);
            let q = Quarter::parse(&text);
            row.insert(column.clone(), Value::Text(text));
            row.insert(PlanProfile::year_column(column), Value::Number(q.year as f64));
            row.insert(PlanProfile::quarter_column(column), Value::Number(q.quarter as f64));
        }

        if !window.contains(Quarter::parse(&text_of(&row, &profile.window_column))) {
            stats.outside_window += 1;
            continue;
        }

        let in_quarter = row
            .get(&profile.commit_date_column)
            .and_then(Value::as_date)
            .map(|d| Quarter::containing(d) == current)
            .unwrap_or(false);
        row.insert(
            profile.revenue_column.clone(),
            Value::text(if in_quarter { "Y" } else { "N" }),
        );

        let short_name = match shortcut_lookup.get(product.as_str()) {
            Some(found) => found.get(&profile.shortcut_value_column).cloned().unwrap_or_default(),
            None => {
                stats.without_shortcut += 1;
                Value::Empty
            }
        };
        row.insert(profile.shortcut_value_column.clone(), short_name.clone());

        for column in &profile.placeholder_columns {
            row.insert(column.clone(), Value::Empty);
        }

        let durations = if short_name.is_empty() {
            None
        } else {
            workday_lookup.get(short_name.as_text().as_str())
        };
        if durations.is_none() {
            stats.without_workdays += 1;
        }
        for wd in &profile.workdays {
            let raw = durations.and_then(|r| r.get(&wd.source));
            row.insert(wd.target.clone(), Value::Number(round_up_workdays(raw) as f64));
        }

        row.remove(&profile.product_column);
        table.push(row);
    }

    table.drop_columns(&[profile.product_column.as_str()]);
    stats.kept = table.len();

    log::info!(
        "plan build: {} read, {} in category, {} excluded, {} outside {}, {} kept",
        stats.rows_read,
        stats.category_matches,
        stats.excluded,
        stats.outside_window,
        window,
        stats.kept
    );
    if stats.without_shortcut > 0 {
        log::warn!("{} plan rows have no product shortcut", stats.without_shortcut);
    }

    Ok(PlanBuild {
        table,
        window,
        stats,
    })
}

/// Workdays rounded up to whole days; missing or non-numeric durations count as 0.
pub fn round_up_workdays(value: Option<&Value>) -> i64 {
    value
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .map(|v| v.ceil() as i64)
        .unwrap_or(0)
}

fn matches_filters(row: &Record, profile: &PlanProfile) -> bool {
    profile
        .filters
        .iter()
        .all(|f| text_of(row, &f.column) == f.value)
}

fn text_of(row: &Record, column: &str) -> String {
    row.get(column).map(Value::as_text).unwrap_or_default()
}

// Numeric and boolean 1/0 become YES/NO, anything else is kept as is
fn map_build_complete(row: &mut Record, column: &str) {
    let mapped = match row.get(column) {
        Some(Value::Number(n)) if *n == 1.0 => Some("YES"),
        Some(Value::Number(n)) if *n == 0.0 => Some("NO"),
        Some(Value::Bool(true)) => Some("YES"),
        Some(Value::Bool(false)) => Some("NO"),
        _ => None,
    };
    if let Some(text) = mapped {
        row.insert(column.to_string(), Value::text(text));
    }
}

/// Index rows by the text of `key`, keeping the first row for each key.
fn first_by_key<'a>(table: &'a Table, key: &str) -> HashMap<String, &'a Record> {
    let mut lookup = HashMap::new();
    for row in &table.rows {
        let k = text_of(row, key);
        if !k.is_empty() {
            lookup.entry(k).or_insert(row);
        }
    }
    lookup
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::record;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 20).unwrap()
    }

    fn export_row(slot: &str, product: &str, build_qtr: &str) -> Record {
        let mut row = record([
            ("Division", "PCB"),
            ("Plan Product Type", "Tool"),
            ("Slot ID/UTID", slot),
            ("Build Product", product),
            ("Build Qtr", build_qtr),
            ("Ship Qtr", "FY25Q4"),
        ]);
        row.insert("Build Complete".into(), Value::Number(0.0));
        row.insert(
            "MFG Commit Date".into(),
            Value::Date(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()),
        );
        row
    }

    fn export(rows: Vec<Record>) -> Table {
        let mut table = Table::new("SAPUI5 Export", Vec::new());
        for row in rows {
            table.push(row);
        }
        table
    }

    fn shortcuts() -> Table {
        let mut table = Table::new("Product Shortcuts", Vec::new());
        table.push(record([("Build Product", "LUMINA HP"), ("Product", "LHP")]));
        table.push(record([("Build Product", "LUMINA HS"), ("Product", "LHS")]));
        table.push(record([("Build Product", "LUMINA HP"), ("Product", "IGNORED")]));
        table
    }

    fn workdays() -> Table {
        let mut table = Table::new("Workdays", Vec::new());
        let mut row = record([("Product", "LHP")]);
        row.insert("Opt".into(), Value::Number(2.2));
        row.insert("Ass & Mech".into(), Value::Number(5.0));
        row.insert("Debug".into(), Value::text("3.01"));
        row.insert("Integration".into(), Value::text("n/a"));
        row.insert("Pack".into(), Value::Empty);
        table.push(row);
        table
    }

    #[test]
    fn filters_renames_and_excludes() {
        let mut other_division = export_row("S2", "AOI FINE HT", "FY25Q3");
        other_division.insert("Division".into(), Value::text("SMT"));
        let table = export(vec![
            export_row("S1", "AOI FINE HT", "FY25Q3"),
            other_division,
            export_row("S3", "TORNADO", "FY25Q3"),
            export_row("S4", "AOI FINE", "FY26Q1"),
        ]);

        let build = build_plan_table(&table, &shortcuts(), &workdays(), &PlanProfile::default(), today())
            .unwrap();

        assert_eq!(build.stats.rows_read, 4);
        assert_eq!(build.stats.category_matches, 3);
        assert_eq!(build.stats.excluded, 1);
        assert_eq!(build.table.len(), 2);
        assert_eq!(build.table.get(0, "Product"), Some(&Value::text("LHP")));
        assert_eq!(build.table.get(1, "Product"), Some(&Value::text("LHS")));
        assert!(!build.table.has_column("Build Product"));
    }

    #[test]
    fn keeps_only_rows_inside_the_quarter_window() {
        let table = export(vec![
            export_row("S1", "AOI FINE HT", "FY25Q1"),
            export_row("S2", "AOI FINE HT", "FY25Q2"),
            export_row("S3", "AOI FINE HT", "FY27Q2"),
            export_row("S4", "AOI FINE HT", "FY27Q3"),
            export_row("S5", "AOI FINE HT", "TBD"),
        ]);
        let build = build_plan_table(&table, &shortcuts(), &workdays(), &PlanProfile::default(), today())
            .unwrap();

        let slots: Vec<String> = (0..build.table.len())
            .map(|i| build.table.get(i, "Slot ID/UTID").unwrap().as_text())
            .collect();
        assert_eq!(slots, vec!["S2", "S3"]);
        assert_eq!(build.stats.outside_window, 3);
        assert_eq!(build.table.get(0, "Build Qtr - Year"), Some(&Value::Number(2025.0)));
        assert_eq!(build.table.get(0, "Ship Qtr - Quarter"), Some(&Value::Number(4.0)));
    }

    #[test]
    fn derives_revenue_build_complete_and_workdays() {
        let mut late = export_row("S2", "AOI FINE HT", "FY25Q3");
        late.insert(
            "MFG Commit Date".into(),
            Value::Date(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()),
        );
        late.insert("Build Complete".into(), Value::Number(1.0));
        let table = export(vec![export_row("S1", "AOI FINE HT", "FY25Q3"), late]);

        let build = build_plan_table(&table, &shortcuts(), &workdays(), &PlanProfile::default(), today())
            .unwrap();

        assert_eq!(build.table.get(0, "Revenue"), Some(&Value::text("Y")));
        assert_eq!(build.table.get(1, "Revenue"), Some(&Value::text("N")));
        assert_eq!(build.table.get(0, "Build Complete"), Some(&Value::text("NO")));
        assert_eq!(build.table.get(1, "Build Complete"), Some(&Value::text("YES")));
        assert_eq!(build.table.get(0, "Opt WD"), Some(&Value::Number(3.0)));
        assert_eq!(build.table.get(0, "Assy WD"), Some(&Value::Number(5.0)));
        assert_eq!(build.table.get(0, "Debug WD"), Some(&Value::Number(4.0)));
        assert_eq!(build.table.get(0, "Int WD"), Some(&Value::Number(0.0)));
        assert_eq!(build.table.get(0, "Pack WD"), Some(&Value::Number(0.0)));
        assert_eq!(build.table.get(0, "Status"), Some(&Value::Empty));
    }

    #[test]
    fn unknown_products_get_zero_workdays() {
        let table = export(vec![export_row("S1", "ZETA 300", "FY25Q3")]);
        let build = build_plan_table(&table, &shortcuts(), &workdays(), &PlanProfile::default(), today())
            .unwrap();
        assert_eq!(build.stats.without_shortcut, 1);
        assert_eq!(build.stats.without_workdays, 1);
        assert_eq!(build.table.get(0, "Product"), Some(&Value::Empty));
        assert_eq!(build.table.get(0, "Opt WD"), Some(&Value::Number(0.0)));
    }

    #[test]
    fn missing_export_column_is_reported() {
        let mut table = Table::new("SAPUI5 Export", vec!["Division".into()]);
        table.push(record([("Division", "PCB")]));
        let err = build_plan_table(&table, &shortcuts(), &workdays(), &PlanProfile::default(), today())
            .unwrap_err();
        assert!(err.to_string().contains("Plan Product Type"));
    }

    #[test]
    fn out_of_range_commit_date_is_not_revenue() {
        let mut row = export_row("S1", "AOI FINE HT", "FY25Q3");
        row.insert("MFG Commit Date".into(), Value::Number(1e12));
        let table = export(vec![row]);

        let build = build_plan_table(&table, &shortcuts(), &workdays(), &PlanProfile::default(), today())
            .unwrap();
        assert_eq!(build.table.len(), 1);
        assert_eq!(build.table.get(0, "Revenue"), Some(&Value::text("N")));
    }

    #[test]
    fn derived_columns_exist_without_kept_rows() {
        let table = export(vec![export_row("S1", "TORNADO", "FY25Q3")]);
        let build = build_plan_table(&table, &shortcuts(), &workdays(), &PlanProfile::default(), today())
            .unwrap();
        assert!(build.table.is_empty());
        for column in ["Revenue", "Product", "Status", "Opt WD", "Build Qtr - Year"] {
            assert!(build.table.has_column(column), "{}", column);
        }
        assert!(!build.table.has_column("Build Product"));
    }

    #[test]
    fn workdays_round_up() {
        assert_eq!(round_up_workdays(Some(&Value::Number(0.1))), 1);
        assert_eq!(round_up_workdays(Some(&Value::Number(4.0))), 4);
        assert_eq!(round_up_workdays(Some(&Value::text(" 2.5 "))), 3);
        assert_eq!(round_up_workdays(Some(&Value::text("x"))), 0);
        assert_eq!(round_up_workdays(None), 0);
    }
}
