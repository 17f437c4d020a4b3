use thiserror::Error;

/// Errors raised while reading, transforming or writing plan and expense workbooks.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("worksheet '{0}' not found in workbook")]
    MissingSheet(String),

    #[error("column '{column}' not found in sheet '{sheet}'")]
    MissingColumn { sheet: String, column: String },

    #[error("failed to read workbook: {0}")]
    Workbook(String),

    #[error("failed to write workbook: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("failed to read csv: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to draw chart: {0}")]
    Chart(String),

    #[error("{0}")]
    InvalidInput(String),
}

impl From<calamine::XlsxError> for PlanError {
    fn from(e: calamine::XlsxError) -> Self {
        PlanError::Workbook(e.to_string())
    }
}

impl PlanError {
    pub fn missing_column(sheet: &str, column: &str) -> Self {
        PlanError::MissingColumn {
            sheet: sheet.to_string(),
            column: column.to_string(),
        }
    }

    /// True when the error was caused by the uploaded files rather than the server.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PlanError::MissingSheet(_)
                | PlanError::MissingColumn { .. }
                | PlanError::Workbook(_)
                | PlanError::Csv(_)
                | PlanError::InvalidInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PlanError>;
