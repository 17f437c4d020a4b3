use chrono::NaiveDate;
use serde::Serialize;

use crate::downloader::{output_file_name, render_plan_workbook};
use crate::error::Result;
use crate::loader::Workbook;
use crate::plan::{PlanStats, build_plan_table};
use crate::quarter::QuarterWindow;
use crate::reconcile::{ReconciliationReport, reconcile};
use crate::rules::PlanProfile;

/// The generated workbook together with what happened while building it.
#[derive(Debug)]
pub struct PlanUpdate {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub summary: UpdateSummary,
}

#[derive(Clone, Debug, Serialize)]
pub struct UpdateSummary {
    pub window: QuarterWindow,
    pub plan: PlanStats,
    pub reconciliation: ReconciliationReport,
}

/// Run the whole plan update on two uploaded workbooks.
///
/// `export` holds the planning export sheet. `plan` is the previous output
/// workbook: its plan sheet supplies the previous rows and it also carries
/// the product shortcut and workday lookup sheets. The returned bytes are
/// the updated copy of `plan`.
///
/// # Arguments
/// * `export` - Bytes of the planning export workbook
/// * `plan` - Bytes of the previous plan workbook
/// * `profile` - Sheet names, filters and layout of the plan variant
/// * `today` - Date that fixes the quarter window and the output stamp
///
/// # Returns
/// * `Result<PlanUpdate>` - The output bytes, file name and row counts, or an
///   input error naming the missing sheet or column
///
/// # Examples
/// ```no_run
/// use plansheet::{PlanProfile, update_plan};
///
/// let export = std::fs::read("export.xlsx").unwrap();
/// let plan = std::fs::read("plan.xlsx").unwrap();
/// let today = chrono::Local::now().date_naive();
/// let update = update_plan(export, plan, &PlanProfile::default(), today).unwrap();
/// std::fs::write(&update.file_name, &update.bytes).unwrap();
/// ```
pub fn update_plan(
    export: Vec<u8>,
    plan: Vec<u8>,
    profile: &PlanProfile,
    today: NaiveDate,
) -> Result<PlanUpdate> {
    let mut export_book = Workbook::from_bytes(export)?;
    let export_table = export_book.sheet_table(&profile.export_sheet, 1)?;

    let mut plan_book = Workbook::from_bytes(plan)?;
    let previous = plan_book.sheet_table(&profile.plan_sheet, profile.layout.header_row)?;
    let shortcuts = plan_book.sheet_table(&profile.shortcuts_sheet, 1)?;
    let workdays = plan_book.sheet_table(&profile.workdays_sheet, 1)?;

    let build = build_plan_table(&export_table, &shortcuts, &workdays, profile, today)?;
    let merged = reconcile(&previous, &build.table, profile);
    let bytes = render_plan_workbook(&mut plan_book, &merged.table, profile, today)?;

    Ok(PlanUpdate {
        file_name: output_file_name(profile, today),
        bytes,
        summary: UpdateSummary {
            window: build.window,
            plan: build.stats,
            reconciliation: merged.report,
        },
    })
}
