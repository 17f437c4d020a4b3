/*!
# Plansheet

Spreadsheet automation for production planning and personal expense tracking,
built in Rust.

## Overview

Two workflows share one crate. The plan updater takes a weekly planning export
and the current production plan workbook, keeps the rows that matter, enriches
them from lookup sheets, reconciles them against the previous plan and writes a
styled, date-stamped Gantt workbook. The expense tracker merges monthly expense
files, totals them per month and category, compares spending with a per-category
budget and charts the result.

## Architecture

### Data Layer
- **table**: loosely typed rows keyed by column header
- **loader**: xlsx (calamine) and csv ingestion into tables and raw sheet cells

### Plan Pipeline
- **rules**: every business constant of a plan variant, loadable from TOML
- **quarter**: fiscal quarter parsing and the rolling planning window
- **plan**: filtering, renaming, derived columns and lookup joins on the export
- **reconcile**: keyed merge of fresh rows into the previous plan
- **downloader**: styled workbook output (rust_xlsxwriter) and csv export
- **updater**: the end-to-end plan update on two uploaded workbooks

### Expenses
- **expense**: expense rows, duplicate-free ledger and monthly totals
- **budget**: JSON-persisted targets and per-category status with rollover
- **graph**: monthly spending and budget charts (plotters)

### Shell
- **config**: `plansheet.toml` settings
- **app**: axum web interface and JSON API
- **error**: the crate error type

## Key Features

- Quarter window of the current quarter plus eight ahead
- Product renames, exclusion list and lookup joins driven by a profile
- Reconciliation that never duplicates a key and never loses an old row
- Output workbook that keeps template sheets and formula columns intact
- Budget status text with surplus rollover from the previous month

## REST API Endpoints

- `POST /api/plan/update` - Upload `export` and `plan` workbooks, download the result
- `POST /api/expenses/upload` - Merge expense files into the ledger
- `GET /api/expenses`, `DELETE /api/expenses` - Ledger summary, clear
- `GET /api/budget`, `POST /api/budget` - Budget status, set targets
- `GET /api/expenses/chart.png`, `GET /api/budget/chart.png` - Charts
*/

pub mod budget;
pub mod config;
pub mod downloader;
pub mod error;
pub mod expense;
pub mod loader;
pub mod plan;
pub mod quarter;
pub mod reconcile;
pub mod rules;
pub mod table;
pub mod updater;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;

pub use error::{PlanError, Result};
pub use rules::PlanProfile;
pub use table::{Table, Value};
pub use updater::{PlanUpdate, update_plan};
