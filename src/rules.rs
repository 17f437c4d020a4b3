//! Business rules for one plan-updater variant.
//!
//! Every constant the plan pipeline relies on lives in [`PlanProfile`]: which
//! rows are kept, how products are renamed, which columns the reconciliation
//! overwrites and where the result lands in the output worksheet. The default
//! profile is the PCB Gantt updater; other variants are expressed as TOML
//! files that override only the fields that differ.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{PlanError, Result};

/// Keep only rows where `column` equals `value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: String,
    pub value: String,
}

/// Rounded-up workday column computed from a raw duration column of the workday sheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkdayColumn {
    pub target: String,
    pub source: String,
}

/// Where the reconciled table is written in the plan worksheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetLayout {
    /// 1-based row holding the header; data follows directly below
    pub header_row: u32,
    /// Rows `header_row..clear_until_row` are wiped before writing
    pub clear_until_row: u32,
    pub first_column: u16,
    pub last_column: u16,
    /// 1-based columns owned by the template (formulas); never cleared or written
    pub preserved_columns: Vec<u16>,
    /// 1-based header columns filled gray instead of blue
    pub gray_header_columns: Vec<u16>,
    pub date_cell: String,
    pub file_prefix: String,
}

impl Default for SheetLayout {
    fn default() -> Self {
        let mut gray_header_columns: Vec<u16> = (10..=19).collect();
        gray_header_columns.extend([6, 22]);
        SheetLayout {
            header_row: 18,
            clear_until_row: 500,
            first_column: 1,
            last_column: 37,
            preserved_columns: vec![19, 21, 22, 24, 25, 27, 28, 30, 31, 33, 34],
            gray_header_columns,
            date_cell: "AH15".to_string(),
            file_prefix: "PCB_GANTT_".to_string(),
        }
    }
}

impl SheetLayout {
    pub fn is_preserved(&self, col: u16) -> bool {
        self.preserved_columns.contains(&col)
    }

    pub fn is_gray_header(&self, col: u16) -> bool {
        self.gray_header_columns.contains(&col)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanProfile {
    pub name: String,

    pub export_sheet: String,
    pub plan_sheet: String,
    pub shortcuts_sheet: String,
    pub workdays_sheet: String,

    pub filters: Vec<ColumnFilter>,
    pub product_column: String,
    pub renames: BTreeMap<String, String>,
    pub excluded_products: Vec<String>,
    pub build_complete_column: String,

    pub quarter_columns: Vec<String>,
    pub window_column: String,
    pub window_quarters: u32,

    pub commit_date_column: String,
    pub revenue_column: String,

    pub shortcut_value_column: String,
    pub workdays: Vec<WorkdayColumn>,
    pub placeholder_columns: Vec<String>,

    pub join_key: String,
    pub update_columns: Vec<String>,
    pub output_columns: Vec<String>,

    pub layout: SheetLayout,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for PlanProfile {
    fn default() -> Self {
        let renames = [
            ("AOI FINE HT", "LUMINA HP"),
            ("AOI FINE", "LUMINA HS"),
            ("LUMINA HT", "LUMINA HP"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();

        let workdays = [
            ("Opt WD", "Opt"),
            ("Assy WD", "Ass & Mech"),
            ("Debug WD", "Debug"),
            ("Int WD", "Integration"),
            ("Pack WD", "Pack"),
        ]
        .into_iter()
        .map(|(target, source)| WorkdayColumn {
            target: target.to_string(),
            source: source.to_string(),
        })
        .collect();

        PlanProfile {
            name: "pcb-gantt".to_string(),
            export_sheet: "SAPUI5 Export".to_string(),
            plan_sheet: "Production Plan".to_string(),
            shortcuts_sheet: "Product Shortcuts".to_string(),
            workdays_sheet: "Workdays".to_string(),
            filters: vec![
                ColumnFilter {
                    column: "Division".to_string(),
                    value: "PCB".to_string(),
                },
                ColumnFilter {
                    column: "Plan Product Type".to_string(),
                    value: "Tool".to_string(),
                },
            ],
            product_column: "Build Product".to_string(),
            renames,
            excluded_products: strings(&[
                "ULTRA DIMENSION 1000",
                "VERIWIDE-A",
                "VERIFINE-A",
                "DIMENSION 6",
                "VERISMART-A",
                "ULTRA VERIFINE-A",
                "VERIWIDE",
                "ULTRA DIMENSION 800 AOI",
                "ULTRA DIMENSION 700 AOI",
                "APEIRON 800SBS",
                "TORNADO",
                "TITANIUM 900",
                "CASTOR TOOL",
                "ULTRA PERFIX 500 P",
                "VERISMART",
                "AIM 600",
                "ULTRA DIMENSION LV",
                "APEIRON 800XT",
            ]),
            build_complete_column: "Build Complete".to_string(),
            quarter_columns: strings(&["Build Qtr", "Ship Qtr"]),
            window_column: "Build Qtr".to_string(),
            window_quarters: 8,
            commit_date_column: "MFG Commit Date".to_string(),
            revenue_column: "Revenue".to_string(),
            shortcut_value_column: "Product".to_string(),
            workdays,
            placeholder_columns: strings(&[
                "Opt Start", "Opt WD", "Opt End", "Assy Start", "Assy WD", "Assy End",
                "Debug Start", "Debug WD", "Debug End", "Int Start", "Int WD", "Int End",
                "Pack Start", "Pack WD", "Pack End", "Status", "Machine Name", "OH PD",
                "Flex PD", "Gripper PD", "Chamber PD", "Opt Resource", "Int Resource",
                "Assy Resource", "Room", "Pack Needed",
            ]),
            join_key: "Slot ID/UTID".to_string(),
            update_columns: strings(&[
                "Build Qtr",
                "Argo ID",
                "Forecast Product",
                "Fab Name",
                "Product Family",
                "Product",
                "Build Complete",
                "MFG Commit Date",
                "Ship Qtr",
                "Revenue",
            ]),
            output_columns: strings(&[
                "Slot ID/UTID", "Argo ID", "Build Qtr", "Forecast Product", "Fab Name",
                "Machine Name", "Product Family", "Product", "Build Complete", "Status",
                "Opt Resource", "Int Resource", "Assy Resource", "Room", "OH PD", "Flex PD",
                "Gripper PD", "Chamber PD", "Opt Start", "Opt WD", "Opt End", "Assy Start",
                "Assy WD", "Assy End", "Debug Start", "Debug WD", "Debug End", "Int Start",
                "Int WD", "Int End", "Pack Start", "Pack WD", "Pack End", "Pack Needed",
                "MFG Commit Date", "Ship Qtr", "Revenue",
            ]),
            layout: SheetLayout::default(),
        }
    }
}

impl PlanProfile {
    /// Parse a profile from TOML; fields not given keep their default values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let profile: PlanProfile = toml::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject profiles the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.join_key.trim().is_empty() {
            return Err(PlanError::InvalidInput("profile has an empty join key".into()));
        }
        if !self.output_columns.contains(&self.join_key) {
            return Err(PlanError::InvalidInput(format!(
                "join key '{}' is not an output column",
                self.join_key
            )));
        }
        // Renaming twice must not change the result
        if let Some((from, to)) = self.renames.iter().find(|(_, to)| self.renames.contains_key(*to)) {
            return Err(PlanError::InvalidInput(format!(
                "rename '{}' -> '{}' feeds another rename",
                from, to
            )));
        }
        let layout = &self.layout;
        if layout.first_column == 0 || layout.last_column < layout.first_column {
            return Err(PlanError::InvalidInput("invalid layout column range".into()));
        }
        if layout.header_row == 0 || layout.clear_until_row <= layout.header_row {
            return Err(PlanError::InvalidInput("invalid layout row range".into()));
        }
        Ok(())
    }

    pub fn rename_product(&self, product: &str) -> String {
        let trimmed = product.trim();
        self.renames
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }

    pub fn is_excluded(&self, product: &str) -> bool {
        let trimmed = product.trim();
        self.excluded_products.iter().any(|p| p == trimmed)
    }

    /// Quarter-derived column names, e.g. `Build Qtr - Year`.
    pub fn year_column(column: &str) -> String {
        format!("{} - Year", column)
    }

    pub fn quarter_column(column: &str) -> String {
        format!("{} - Quarter", column)
    }

    pub fn output_file_prefix(&self) -> &str {
        &self.layout.file_prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid() {
        let profile = PlanProfile::default();
        profile.validate().unwrap();
        assert_eq!(profile.output_columns.len(), 37);
        assert_eq!(profile.excluded_products.len(), 18);
        assert_eq!(profile.layout.last_column as usize, profile.output_columns.len());
    }

    #[test]
    fn rename_is_idempotent() {
        let profile = PlanProfile::default();
        for product in ["AOI FINE HT", "AOI FINE", "LUMINA HT", "LUMINA HP", "ZETA 300"] {
            let once = profile.rename_product(product);
            assert_eq!(profile.rename_product(&once), once);
        }
        assert_eq!(profile.rename_product("AOI FINE"), "LUMINA HS");
        assert_eq!(profile.rename_product(" LUMINA HT "), "LUMINA HP");
    }

    #[test]
    fn chained_renames_are_rejected() {
        let err = PlanProfile::from_toml_str(
            r#"
            [renames]
            "A" = "B"
            "B" = "C"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("feeds another rename"));
    }

    #[test]
    fn toml_overrides_keep_other_defaults() {
        let profile = PlanProfile::from_toml_str(
            r#"
            name = "smt-gantt"
            plan_sheet = "SMT Plan"
            excluded_products = ["TORNADO"]

            [layout]
            file_prefix = "SMT_GANTT_"
            "#,
        )
        .unwrap();
        assert_eq!(profile.plan_sheet, "SMT Plan");
        assert_eq!(profile.excluded_products, vec!["TORNADO"]);
        assert_eq!(profile.join_key, "Slot ID/UTID");
        assert_eq!(profile.layout.file_prefix, "SMT_GANTT_");
        assert_eq!(profile.layout.header_row, 18);
    }

    #[test]
    fn exclusion_matches_whole_names() {
        let profile = PlanProfile::default();
        assert!(profile.is_excluded("VERIWIDE"));
        assert!(!profile.is_excluded("VERIWIDE-B"));
        assert!(!profile.is_excluded("LUMINA HP"));
    }
}
