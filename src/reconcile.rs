// Plan reconciliation: fold freshly computed plan rows into the previous plan.
//
//   previous rows (keyed)  +  fresh rows (keyed)
//        |                         |
//        |  matched keys: update columns overwritten from fresh
//        |  unmatched previous: kept untouched
//        +--> combined = previous ++ fresh-only, first row per key wins

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::rules::PlanProfile;
use crate::table::{Record, Table, Value};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReconciliationReport {
    /// Previous rows whose key appeared in the fresh table
    pub updated: usize,
    /// Fresh rows with a key the previous plan did not have
    pub appended: usize,
    /// Previous rows with no fresh counterpart
    pub retained: usize,
    /// Previous rows dropped for an empty key
    pub dropped_keyless: usize,
    /// Fresh rows superseded by a later row with the same key
    pub superseded_fresh: usize,
    /// Previous rows dropped as repeats of an earlier key
    pub dropped_duplicates: usize,
    pub total: usize,
}

impl ReconciliationReport {
    pub fn summary(&self) -> String {
        format!(
            "{} rows: {} updated, {} new, {} kept from previous plan ({} duplicate, {} without key dropped)",
            self.total,
            self.updated,
            self.appended,
            self.retained,
            self.dropped_duplicates + self.superseded_fresh,
            self.dropped_keyless
        )
    }
}

#[derive(Clone, Debug)]
pub struct Reconciliation {
    pub table: Table,
    pub report: ReconciliationReport,
}

fn key_of(row: &Record, key: &str) -> Option<String> {
    row.get(key)
        .map(Value::as_text)
        .filter(|k| !k.is_empty())
}

/// Merge `fresh` into `previous` by the profile's join key.
///
/// The output holds, in order, the previous rows (with the update columns
/// taken from fresh rows on matching keys) followed by fresh rows with
/// unseen keys, projected to the profile's output columns. No key appears
/// twice.
///
/// # Arguments
/// * `previous` - Rows read from the current plan sheet
/// * `fresh` - Rows built from the export
/// * `profile` - Join key, update columns and output columns
///
/// # Returns
/// * `Reconciliation` - The merged table and the per-outcome row counts
///
/// # Examples
/// ```
/// use plansheet::reconcile::reconcile;
/// use plansheet::{PlanProfile, Table, Value};
///
/// let profile = PlanProfile::default();
/// let mut previous = Table::new("Production Plan", vec!["Slot ID/UTID".to_string()]);
/// previous.push([("Slot ID/UTID".to_string(), Value::text("S-1"))].into_iter().collect());
/// let mut fresh = Table::new("Export", vec!["Slot ID/UTID".to_string()]);
/// fresh.push([("Slot ID/UTID".to_string(), Value::text("S-2"))].into_iter().collect());
///
/// let merged = reconcile(&previous, &fresh, &profile);
/// assert_eq!(merged.report.retained, 1);
/// assert_eq!(merged.report.appended, 1);
/// assert_eq!(merged.table.len(), 2);
/// ```
pub fn reconcile(previous: &Table, fresh: &Table, profile: &PlanProfile) -> Reconciliation {
    let key = profile.join_key.as_str();
    let mut report = ReconciliationReport::default();

    // Last fresh row per key wins
    let mut latest: HashMap<String, usize> = HashMap::new();
    let mut fresh_order: Vec<String> = Vec::new();
    for (i, row) in fresh.rows.iter().enumerate() {
        let Some(k) = key_of(row, key) else {
            continue;
        };
        if latest.insert(k.clone(), i).is_some() {
            report.superseded_fresh += 1;
        } else {
            fresh_order.push(k);
        }
    }

    let mut combined = Table::new(previous.name.clone(), previous.columns.clone());
    let mut seen: HashSet<String> = HashSet::new();
    let mut previous_keys: HashSet<String> = HashSet::new();

    for row in &previous.rows {
        let Some(k) = key_of(row, key) else {
            report.dropped_keyless += 1;
            continue;
        };
        previous_keys.insert(k.clone());

        let mut row = row.clone();
        let matched = latest.get(&k).map(|&i| &fresh.rows[i]);
        if let Some(source) = matched {
            for column in &profile.update_columns {
                row.insert(column.clone(), source.get(column).cloned().unwrap_or_default());
            }
        }

        if !seen.insert(k) {
            report.dropped_duplicates += 1;
            continue;
        }
        if matched.is_some() {
            report.updated += 1;
        } else {
            report.retained += 1;
        }
        combined.push(row);
    }

    for k in fresh_order {
        if previous_keys.contains(&k) {
            continue;
        }
        let row = fresh.rows[latest[&k]].clone();
        seen.insert(k);
        report.appended += 1;
        combined.push(row);
    }

    let table = combined.project(&profile.output_columns);
    report.total = table.len();
    log::info!("reconciled plan: {}", report.summary());

    Reconciliation { table, report }
}
