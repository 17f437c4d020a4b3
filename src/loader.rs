use calamine::{Data, Reader, Xlsx, open_workbook_from_rs};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use crate::error::{PlanError, Result};
use crate::table::{Record, Table, Value, parse_number_or_text, serial_to_date};

/// A non-empty worksheet cell with its absolute, 1-based position.
#[derive(Clone, Debug, PartialEq)]
pub struct SheetCell {
    pub row: u32,
    pub col: u16,
    pub value: Value,
    pub formula: Option<String>,
}

/// An xlsx workbook held in memory.
///
/// Uploaded files arrive as bytes, so files on disk are read fully and
/// go through the same path.
pub struct Workbook {
    inner: Xlsx<Cursor<Vec<u8>>>,
}

impl Workbook {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let inner: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))?;
        Ok(Workbook { inner })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes)
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.inner.sheet_names()
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheet_names().iter().any(|s| s == name)
    }

    fn range(&mut self, name: &str) -> Result<calamine::Range<Data>> {
        if !self.has_sheet(name) {
            return Err(PlanError::MissingSheet(name.to_string()));
        }
        Ok(self.inner.worksheet_range(name)?)
    }

    /// Every non-empty cell of the sheet, values and formulas merged.
    pub fn sheet_cells(&mut self, name: &str) -> Result<Vec<SheetCell>> {
        let range = self.range(name)?;
        let mut cells: BTreeMap<(u32, u16), SheetCell> = BTreeMap::new();

        if let Some((r0, c0)) = range.start() {
            for (r, c, data) in range.used_cells() {
                let value = data_to_value(data);
                if value.is_empty() {
                    continue;
                }
                let (row, col) = (r0 + r as u32 + 1, (c0 + c as u32 + 1) as u16);
                cells.insert(
                    (row, col),
                    SheetCell {
                        row,
                        col,
                        value,
                        formula: None,
                    },
                );
            }
        }

        let formulas = self.inner.worksheet_formula(name)?;
        if let Some((r0, c0)) = formulas.start() {
            for (r, c, formula) in formulas.used_cells() {
                if formula.is_empty() {
                    continue;
                }
                let (row, col) = (r0 + r as u32 + 1, (c0 + c as u32 + 1) as u16);
                cells
                    .entry((row, col))
                    .or_insert_with(|| SheetCell {
                        row,
                        col,
                        value: Value::Empty,
                        formula: None,
                    })
                    .formula = Some(formula.clone());
            }
        }

        Ok(cells.into_values().collect())
    }

    /// Read a sheet into a table using the given 1-based header row.
    ///
    /// Columns without a header are ignored, repeated headers get a `.1`, `.2`
    /// suffix and rows that are entirely empty are skipped.
    ///
    /// # Arguments
    /// * `name` - Sheet name
    /// * `header_row` - 1-based row holding the column headers
    ///
    /// # Returns
    /// * `Result<Table>` - Rows below the header, or `MissingSheet`
    ///
    /// # Examples
    /// ```no_run
    /// use plansheet::loader::Workbook;
    ///
    /// let mut book = Workbook::from_bytes(std::fs::read("plan.xlsx").unwrap()).unwrap();
    /// let previous = book.sheet_table("Production Plan", 18).unwrap();
    /// println!("{} previous rows", previous.len());
    /// ```
    pub fn sheet_table(&mut self, name: &str, header_row: u32) -> Result<Table> {
        let range = self.range(name)?;
        let mut grid: BTreeMap<u32, BTreeMap<u16, Value>> = BTreeMap::new();

        if let Some((r0, c0)) = range.start() {
            for (r, c, data) in range.used_cells() {
                let value = data_to_value(data);
                if value.is_empty() {
                    continue;
                }
                grid.entry(r0 + r as u32 + 1)
                    .or_default()
                    .insert((c0 + c as u32 + 1) as u16, value);
            }
        }

        let headers = match grid.get(&header_row) {
            Some(cells) => unique_headers(cells),
            None => Vec::new(),
        };

        let mut table = Table::new(name, headers.iter().map(|(_, h)| h.clone()).collect());
        for (_, cells) in grid.range(header_row + 1..) {
            let record: Record = headers
                .iter()
                .map(|(col, h)| (h.clone(), cells.get(col).cloned().unwrap_or_default()))
                .collect();
            if record.values().all(Value::is_empty) {
                continue;
            }
            table.rows.push(record);
        }

        log::debug!("read {} rows from sheet '{}'", table.len(), name);
        Ok(table)
    }

    /// The first sheet read with a header in row 1.
    pub fn first_sheet_table(&mut self) -> Result<Table> {
        let name = self
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| PlanError::Workbook("no sheets found in workbook".to_string()))?;
        self.sheet_table(&name, 1)
    }
}

fn unique_headers(cells: &BTreeMap<u16, Value>) -> Vec<(u16, String)> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut headers = Vec::new();
    for (col, value) in cells {
        let base = value.as_text();
        if base.is_empty() {
            continue;
        }
        let count = seen.entry(base.clone()).or_insert(0);
        let name = if *count == 0 {
            base.clone()
        } else {
            format!("{}.{}", base, count)
        };
        *count += 1;
        headers.push((*col, name));
    }
    headers
}

/// Map a calamine cell to a [`Value`].
pub fn data_to_value(data: &Data) -> Value {
    match data {
        Data::Int(i) => Value::Number(*i as f64),
        Data::Float(f) => Value::Number(*f),
        Data::String(s) if s.trim().is_empty() => Value::Empty,
        Data::String(s) => Value::Text(s.clone()),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            if dt.is_datetime() {
                serial_to_date(serial).map(Value::Date).unwrap_or(Value::Number(serial))
            } else {
                Value::Number(serial)
            }
        }
        Data::DateTimeIso(s) => {
            let text = Value::Text(s.clone());
            text.as_date().map(Value::Date).unwrap_or(text)
        }
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) | Data::Empty => Value::Empty,
    }
}

/// Read csv bytes with a header row into a table.
pub fn read_csv(name: &str, bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut table = Table::new(name, headers.clone());

    for result in reader.records() {
        let row = result?;
        let record: Record = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), row.get(i).map(parse_number_or_text).unwrap_or_default()))
            .collect();
        if record.values().all(Value::is_empty) {
            continue;
        }
        table.rows.push(record);
    }

    Ok(table)
}

/// Load the first sheet of an uploaded file, choosing the reader by extension.
pub fn table_from_upload(filename: &str, bytes: Vec<u8>) -> Result<Table> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => read_csv(filename, &bytes),
        Some("xlsx") | Some("xlsm") => {
            let mut table = Workbook::from_bytes(bytes)?.first_sheet_table()?;
            table.name = filename.to_string();
            Ok(table)
        }
        Some(ext) => Err(PlanError::InvalidInput(format!(
            "unsupported file extension: {}",
            ext
        ))),
        None => Err(PlanError::InvalidInput(format!(
            "file has no extension: {}",
            filename
        ))),
    }
}

/// Load a table from a file on disk.
pub fn load_table(path: impl AsRef<Path>) -> Result<Table> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    table_from_upload(&name, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_cells_become_numbers_or_text() {
        let csv = b"Date,Category,Amount\n2024-03-01,Groceries,12.50\n,, \n2024-03-02,Rent,900\n";
        let table = read_csv("march.csv", csv).unwrap();
        assert_eq!(table.columns, vec!["Date", "Category", "Amount"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "Amount"), Some(&Value::Number(12.5)));
        assert_eq!(table.get(1, "Category"), Some(&Value::text("Rent")));
    }

    #[test]
    fn duplicate_headers_get_suffixes() {
        let mut cells = BTreeMap::new();
        cells.insert(1, Value::text("Pack"));
        cells.insert(2, Value::text("Pack"));
        cells.insert(4, Value::text("Room"));
        let headers = unique_headers(&cells);
        assert_eq!(
            headers,
            vec![
                (1, "Pack".to_string()),
                (2, "Pack.1".to_string()),
                (4, "Room".to_string())
            ]
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = table_from_upload("notes.txt", Vec::new()).unwrap_err();
        assert!(err.is_input_error());
    }
}
