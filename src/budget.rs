use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{PlanError, Result};
use crate::expense::{ExpenseLedger, previous_month};

const CENT: f64 = 0.005;

/// Per-category spending targets, stored as a flat JSON object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Budget {
    targets: BTreeMap<String, f64>,
}

impl Budget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the budget file; a missing file is an empty budget.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Budget::new());
        }
        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Budget::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the budget as pretty JSON, replacing the file in one step.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };
        let json = serde_json::to_string_pretty(self)?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(json.as_bytes())?;
        file.persist(path).map_err(|e| PlanError::Io(e.error))?;
        Ok(())
    }

    pub fn set(&mut self, category: &str, amount: f64) -> Result<()> {
        let category = category.trim();
        if category.is_empty() {
            return Err(PlanError::InvalidInput("budget category cannot be empty".into()));
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(PlanError::InvalidInput(format!(
                "invalid budget amount for {}: {}",
                category, amount
            )));
        }
        self.targets.insert(category.to_string(), amount);
        Ok(())
    }

    pub fn get(&self, category: &str) -> Option<f64> {
        self.targets.get(category.trim()).copied()
    }

    pub fn remove(&mut self, category: &str) -> Option<f64> {
        self.targets.remove(category.trim())
    }

    pub fn targets(&self) -> &BTreeMap<String, f64> {
        &self.targets
    }

    /// Status of every budgeted or spent category in `month`.
    pub fn compare(&self, ledger: &ExpenseLedger, month: &str) -> Vec<CategoryStatus> {
        let spent = ledger.category_totals(month);
        let prior = previous_month(month).filter(|p| ledger.months().contains(p));
        let prior_spent = prior
            .as_deref()
            .map(|p| ledger.category_totals(p))
            .unwrap_or_default();

        let categories: BTreeSet<&String> = self.targets.keys().chain(spent.keys()).collect();

        categories
            .into_iter()
            .map(|category| {
                let amount = spent.get(category).copied().unwrap_or(0.0);
                let budget = self.get(category);
                let kind = match budget {
                    None => StatusKind::NoBudget,
                    Some(target) if amount < target - CENT => StatusKind::Under {
                        remaining: target - amount,
                    },
                    Some(target) if amount > target + CENT => StatusKind::Over {
                        excess: amount - target,
                    },
                    Some(_) => StatusKind::OnTarget,
                };
                let rollover = match (budget, prior.as_ref()) {
                    (Some(target), Some(p)) => {
                        let surplus = target - prior_spent.get(category).copied().unwrap_or(0.0);
                        (surplus > CENT).then(|| Rollover {
                            from_month: p.clone(),
                            amount: surplus,
                        })
                    }
                    _ => None,
                };
                CategoryStatus {
                    category: category.clone(),
                    month: month.to_string(),
                    spent: amount,
                    budget,
                    kind,
                    rollover,
                }
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusKind {
    NoBudget,
    Under { remaining: f64 },
    Over { excess: f64 },
    OnTarget,
}

/// Unspent budget from the month before.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Rollover {
    pub from_month: String,
    pub amount: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryStatus {
    pub category: String,
    pub month: String,
    pub spent: f64,
    pub budget: Option<f64>,
    pub kind: StatusKind,
    pub rollover: Option<Rollover>,
}

impl CategoryStatus {
    pub fn is_over(&self) -> bool {
        matches!(self.kind, StatusKind::Over { .. })
    }

    pub fn message(&self) -> String {
        let budget = self.budget.unwrap_or(0.0);
        let mut text = match &self.kind {
            StatusKind::NoBudget => {
                format!("{}: spent {:.2} with no budget set.", self.category, self.spent)
            }
            StatusKind::Under { remaining } => format!(
                "{}: spent {:.2} of {:.2} ({:.2} remaining).",
                self.category, self.spent, budget, remaining
            ),
            StatusKind::Over { excess } => format!(
                "{}: spent {:.2} of {:.2}, over budget by {:.2}.",
                self.category, self.spent, budget, excess
            ),
            StatusKind::OnTarget => format!(
                "{}: spent {:.2} of {:.2}, exactly on budget.",
                self.category, self.spent, budget
            ),
        };
        if let Some(rollover) = &self.rollover {
            text.push_str(&format!(
                " Surplus of {:.2} from {} rolls over.",
                rollover.amount, rollover.from_month
            ));
        }
        text
    }
}
