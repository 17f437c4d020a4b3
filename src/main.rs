#![cfg(not(tarpaulin_include))]
use anyhow::{Context, anyhow, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use plansheet::app;
use plansheet::budget::Budget;
use plansheet::config::Settings;
use plansheet::expense::{ExpenseLedger, expenses_from_table, normalize_month};
use plansheet::graph::{ChartOptions, render_monthly_chart};
use plansheet::loader::load_table;
use plansheet::rules::PlanProfile;
use plansheet::updater::update_plan;

#[derive(Parser)]
#[command(name = "plansheet")]
#[command(about = "Production plan updater and expense tracker", long_about = None)]
struct Cli {
    /// Settings file (defaults to $PLANSHEET_CONFIG or ./plansheet.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web interface
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:3000
        #[arg(long)]
        bind: Option<String>,
    },
    /// Build the updated plan workbook from an export and the current plan
    UpdatePlan {
        #[arg(long)]
        export: PathBuf,
        #[arg(long)]
        plan: PathBuf,
        /// Directory for the generated workbook
        #[arg(long)]
        out: Option<PathBuf>,
        /// Plan profile TOML overriding the built-in rules
        #[arg(long)]
        profile: Option<PathBuf>,
        /// Run as of this date (YYYY-MM-DD) instead of today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Summarise expense files and compare them with the budget
    Expenses {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        budget: Option<PathBuf>,
        /// Month to compare (YYYY-MM); the latest month by default
        #[arg(long)]
        month: Option<String>,
        /// Write a PNG chart of monthly spending here
        #[arg(long)]
        chart: Option<PathBuf>,
    },
    /// Manage category budgets
    Budget {
        #[arg(long)]
        file: Option<PathBuf>,
        #[command(subcommand)]
        action: BudgetAction,
    },
}

#[derive(Subcommand)]
enum BudgetAction {
    Set { category: String, amount: f64 },
    Remove { category: String },
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                settings.bind_addr = bind;
            }
            app::run(settings)
                .await
                .map_err(|e| anyhow!("server stopped: {}", e))?;
        }
        Commands::UpdatePlan {
            export,
            plan,
            out,
            profile,
            date,
        } => {
            let profile = match profile {
                Some(path) => PlanProfile::load(&path)
                    .with_context(|| format!("failed to load profile {}", path.display()))?,
                None => settings.plan_profile()?,
            };
            let today = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let out = out.unwrap_or_else(|| settings.output_dir.clone());
            run_update(&export, &plan, &out, &profile, today)?;
        }
        Commands::Expenses {
            files,
            budget,
            month,
            chart,
        } => {
            let budget_path = budget.unwrap_or_else(|| settings.budget_path.clone());
            run_expenses(&files, &budget_path, month.as_deref(), chart.as_deref())?;
        }
        Commands::Budget { file, action } => {
            let path = file.unwrap_or_else(|| settings.budget_path.clone());
            run_budget(&path, action)?;
        }
    }

    Ok(())
}

fn run_update(
    export: &Path,
    plan: &Path,
    out: &Path,
    profile: &PlanProfile,
    today: NaiveDate,
) -> anyhow::Result<()> {
    let export_bytes =
        fs::read(export).with_context(|| format!("failed to read {}", export.display()))?;
    let plan_bytes = fs::read(plan).with_context(|| format!("failed to read {}", plan.display()))?;

    let update = update_plan(export_bytes, plan_bytes, profile, today)?;

    fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    let target = out.join(&update.file_name);
    fs::write(&target, &update.bytes)
        .with_context(|| format!("failed to write {}", target.display()))?;

    let stats = &update.summary.plan;
    println!("Window: {}", update.summary.window);
    println!(
        "Export: {} rows read, {} matched filters, {} excluded, {} outside window, {} kept",
        stats.rows_read, stats.category_matches, stats.excluded, stats.outside_window, stats.kept
    );
    println!("Plan: {}", update.summary.reconciliation.summary());
    println!("Saved {}", target.display());
    Ok(())
}

fn run_expenses(
    files: &[PathBuf],
    budget_path: &Path,
    month: Option<&str>,
    chart: Option<&Path>,
) -> anyhow::Result<()> {
    let mut ledger = ExpenseLedger::new();
    for path in files {
        let table = load_table(path).with_context(|| format!("failed to read {}", path.display()))?;
        let parsed = expenses_from_table(&table)?;
        let outcome = ledger.merge(parsed.rows);
        println!(
            "{}: {} rows, {} duplicates, {} skipped",
            path.display(),
            outcome.added,
            outcome.duplicates,
            parsed.skipped
        );
    }

    let totals = ledger.monthly_totals();
    for m in ledger.months() {
        println!("\n{} (total {:.2})", m, ledger.month_total(&m));
        for category in ledger.categories() {
            if let Some(total) = totals.get(&(m.clone(), category.clone())) {
                println!("  {:<20} {:>10.2}", category, total);
            }
        }
    }

    let month = match month {
        Some(m) => Some(normalize_month(m).ok_or_else(|| anyhow!("invalid month '{}'", m))?),
        None => ledger.latest_month(),
    };
    let Some(month) = month else {
        bail!("no expense rows found");
    };

    let budget = Budget::load(budget_path)?;
    println!("\nBudget for {}:", month);
    for status in budget.compare(&ledger, &month) {
        println!("  {}", status.message());
    }

    if let Some(path) = chart {
        let png = render_monthly_chart(&ledger, &ChartOptions::default())?;
        fs::write(path, png).with_context(|| format!("failed to write {}", path.display()))?;
        println!("\nChart saved to {}", path.display());
    }
    Ok(())
}

fn run_budget(path: &Path, action: BudgetAction) -> anyhow::Result<()> {
    let mut budget = Budget::load(path)?;
    match action {
        BudgetAction::Set { category, amount } => {
            budget.set(&category, amount)?;
            budget.save(path)?;
            println!("{} set to {:.2}", category.trim(), amount);
        }
        BudgetAction::Remove { category } => {
            if budget.remove(&category).is_none() {
                bail!("no budget set for '{}'", category);
            }
            budget.save(path)?;
            println!("{} removed", category);
        }
        BudgetAction::Show => {
            if budget.targets().is_empty() {
                println!("No budget set ({})", path.display());
            }
            for (category, amount) in budget.targets() {
                println!("{:<20} {:>10.2}", category, amount);
            }
        }
    }
    Ok(())
}
