//! Runtime settings read from `plansheet.toml`.
//!
//! Every key is optional. A missing file means all defaults. The
//! `PLANSHEET_CONFIG` environment variable names a different file, and an
//! explicit path (the CLI `--config` flag) wins over both.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::rules::PlanProfile;

pub const CONFIG_ENV: &str = "PLANSHEET_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "plansheet.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the web server listens on
    pub bind_addr: String,
    /// JSON file holding the per-category budget
    pub budget_path: PathBuf,
    /// Directory generated plan workbooks are written to by the CLI
    pub output_dir: PathBuf,
    /// Optional TOML file overriding the built-in plan profile
    pub profile_path: Option<PathBuf>,
    /// Largest accepted upload body, in megabytes
    pub upload_limit_mb: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bind_addr: "127.0.0.1:3000".to_string(),
            budget_path: PathBuf::from("budget.json"),
            output_dir: PathBuf::from("."),
            profile_path: None,
            upload_limit_mb: 50,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Resolve the settings file and load it.
    ///
    /// Lookup order: `explicit`, then `$PLANSHEET_CONFIG`, then
    /// `./plansheet.toml`. Only the last one may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            log::info!("reading settings from {}", path.display());
            return Self::from_file(path);
        }
        if let Ok(path) = env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                log::info!("reading settings from {} ({})", path, CONFIG_ENV);
                return Self::from_file(path);
            }
        }
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            log::info!("reading settings from {}", DEFAULT_CONFIG_FILE);
            return Self::from_file(default_path);
        }
        Ok(Settings::default())
    }

    /// The plan profile named by `profile_path`, or the built-in one.
    pub fn plan_profile(&self) -> Result<PlanProfile> {
        match &self.profile_path {
            Some(path) => PlanProfile::load(path),
            None => Ok(PlanProfile::default()),
        }
    }

    pub fn upload_limit_bytes(&self) -> usize {
        self.upload_limit_mb * 1024 * 1024
    }
}
