use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook as XlsxWorkbook, Worksheet};

use crate::error::{PlanError, Result};
use crate::loader::{SheetCell, Workbook};
use crate::rules::{PlanProfile, SheetLayout};
use crate::table::{Table, Value, date_to_serial};

lazy_static! {
    static ref CELL_REF_REGEX: Regex = Regex::new(r"^([A-Za-z]{1,3})([0-9]+)$").unwrap();
}

const HEADER_GRAY: u32 = 0xF2F2F2;
const HEADER_BLUE: u32 = 0xB8CCE4;
const DATE_FORMAT: &str = "yyyy-mm-dd";

/// Cell formats used on the plan sheet.
struct PlanFormats {
    header_gray: Format,
    header_blue: Format,
    cell: Format,
    date: Format,
    plain_date: Format,
}

impl PlanFormats {
    fn new() -> Self {
        let cell = Format::new()
            .set_font_name("Calibri")
            .set_font_size(10)
            .set_align(FormatAlign::Center)
            .set_border(FormatBorder::Thin)
            .set_border_color(0x000000);

        PlanFormats {
            header_gray: cell.clone().set_background_color(HEADER_GRAY),
            header_blue: cell.clone().set_background_color(HEADER_BLUE),
            date: cell.clone().set_num_format(DATE_FORMAT),
            plain_date: Format::new().set_num_format(DATE_FORMAT),
            cell,
        }
    }
}

/// File name of the generated plan, e.g. `PCB_GANTT_2025-05-20.xlsx`.
pub fn output_file_name(profile: &PlanProfile, today: NaiveDate) -> String {
    format!(
        "{}{}.xlsx",
        profile.output_file_prefix(),
        today.format("%Y-%m-%d")
    )
}

/// Write the reconciled plan into a copy of the template workbook.
///
/// Every template sheet is carried over cell by cell. On the plan sheet the
/// data block below the header row is cleared, except for the preserved
/// (formula) columns, and `table` is written there with header fills,
/// borders and centred Calibri 10. Today's date lands in the layout's stamp
/// cell.
///
/// # Arguments
/// * `template` - The previous plan workbook
/// * `table` - Reconciled rows, written in `profile.output_columns` order
/// * `profile` - Plan sheet name and layout
/// * `today` - Date written to the stamp cell
///
/// # Returns
/// * `Result<Vec<u8>>` - The xlsx bytes, or `MissingSheet` when the template
///   has no plan sheet
///
/// # Examples
/// ```no_run
/// use plansheet::downloader::render_plan_workbook;
/// use plansheet::loader::Workbook;
/// use plansheet::{PlanProfile, Table};
///
/// let profile = PlanProfile::default();
/// let mut template = Workbook::from_bytes(std::fs::read("plan.xlsx").unwrap()).unwrap();
/// let table = Table::new("Production Plan", profile.output_columns.clone());
/// let today = chrono::Local::now().date_naive();
/// let bytes = render_plan_workbook(&mut template, &table, &profile, today).unwrap();
/// std::fs::write("out.xlsx", bytes).unwrap();
/// ```
pub fn render_plan_workbook(
    template: &mut Workbook,
    table: &Table,
    profile: &PlanProfile,
    today: NaiveDate,
) -> Result<Vec<u8>> {
    if !template.has_sheet(&profile.plan_sheet) {
        return Err(PlanError::MissingSheet(profile.plan_sheet.clone()));
    }

    let layout = &profile.layout;
    let formats = PlanFormats::new();
    let mut workbook = XlsxWorkbook::new();

    for name in template.sheet_names() {
        let cells = template.sheet_cells(&name)?;
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&name)?;

        let is_plan = name == profile.plan_sheet;
        for cell in &cells {
            if is_plan && in_cleared_block(layout, cell.row, cell.col) {
                continue;
            }
            copy_cell(worksheet, cell, &formats)?;
        }

        if is_plan {
            write_plan_block(worksheet, table, layout, &formats)?;
            let (row, col) = parse_cell_ref(&layout.date_cell)?;
            worksheet.write_string(row, col, today.format("%Y-%m-%d").to_string())?;
        }
    }

    log::info!(
        "rendered {} plan rows into sheet '{}'",
        table.len(),
        profile.plan_sheet
    );
    Ok(workbook.save_to_buffer()?)
}

fn in_cleared_block(layout: &SheetLayout, row: u32, col: u16) -> bool {
    row >= layout.header_row
        && row < layout.clear_until_row
        && col >= layout.first_column
        && col <= layout.last_column
        && !layout.is_preserved(col)
}

fn copy_cell(worksheet: &mut Worksheet, cell: &SheetCell, formats: &PlanFormats) -> Result<()> {
    let (row, col) = (cell.row - 1, cell.col - 1);
    if let Some(formula) = &cell.formula {
        worksheet.write_formula(row, col, formula.as_str())?;
        return Ok(());
    }
    match &cell.value {
        Value::Empty => {}
        Value::Text(s) => {
            worksheet.write_string(row, col, s)?;
        }
        Value::Number(n) => {
            worksheet.write_number(row, col, *n)?;
        }
        Value::Bool(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        Value::Date(d) => {
            worksheet.write_number_with_format(row, col, date_to_serial(*d), &formats.plain_date)?;
        }
    }
    Ok(())
}

fn write_plan_block(
    worksheet: &mut Worksheet,
    table: &Table,
    layout: &SheetLayout,
    formats: &PlanFormats,
) -> Result<()> {
    let header_row = layout.header_row - 1;

    for (i, name) in table.columns.iter().enumerate() {
        let col = layout.first_column + i as u16;
        if layout.is_preserved(col) {
            continue;
        }
        let format = if layout.is_gray_header(col) {
            &formats.header_gray
        } else {
            &formats.header_blue
        };
        worksheet.write_string_with_format(header_row, col - 1, name, format)?;
    }

    for r in 0..table.len() {
        let row = header_row + 1 + r as u32;
        for (i, value) in table.row_values(r).into_iter().enumerate() {
            let col = layout.first_column + i as u16;
            if layout.is_preserved(col) {
                continue;
            }
            write_value(worksheet, row, col - 1, &value, formats)?;
        }
    }
    Ok(())
}

fn write_value(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &Value,
    formats: &PlanFormats,
) -> Result<()> {
    match value {
        Value::Empty => {
            worksheet.write_blank(row, col, &formats.cell)?;
        }
        Value::Text(s) => {
            worksheet.write_string_with_format(row, col, s, &formats.cell)?;
        }
        Value::Number(n) => {
            worksheet.write_number_with_format(row, col, *n, &formats.cell)?;
        }
        Value::Bool(b) => {
            worksheet.write_boolean_with_format(row, col, *b, &formats.cell)?;
        }
        Value::Date(d) => {
            worksheet.write_number_with_format(row, col, date_to_serial(*d), &formats.date)?;
        }
    }
    Ok(())
}

/// Export a table to CSV, header first, columns in table order.
pub fn table_to_csv(table: &Table) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&table.columns)?;
    for r in 0..table.len() {
        writer.write_record(table.row_values(r).iter().map(|v| v.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PlanError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| PlanError::InvalidInput(e.to_string()))
}

/// Convert column number to letter (A=1, B=2, etc.)
pub fn column_to_letter(col: u16) -> String {
    let mut name = String::new();
    let mut n = col;

    while n > 0 {
        n -= 1;
        name.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }

    name
}

pub fn letter_to_column(letters: &str) -> u16 {
    letters
        .chars()
        .fold(0, |acc, c| acc * 26 + (c.to_ascii_uppercase() as u16 - 'A' as u16 + 1))
}

/// Parse an A1-style reference into zero-based `(row, col)`.
pub fn parse_cell_ref(reference: &str) -> Result<(u32, u16)> {
    let caps = CELL_REF_REGEX
        .captures(reference.trim())
        .ok_or_else(|| PlanError::InvalidInput(format!("invalid cell reference: {}", reference)))?;
    let col = letter_to_column(&caps[1]);
    let row: u32 = caps[2]
        .parse()
        .map_err(|_| PlanError::InvalidInput(format!("invalid cell reference: {}", reference)))?;
    if row == 0 {
        return Err(PlanError::InvalidInput(format!("invalid cell reference: {}", reference)));
    }
    Ok((row - 1, col - 1))
}
