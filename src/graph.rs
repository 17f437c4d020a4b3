#![cfg(feature = "web")]
use plotters::prelude::*;
use std::collections::BTreeMap;
use std::io::Cursor;

use crate::budget::CategoryStatus;
use crate::error::{PlanError, Result};
use crate::expense::ExpenseLedger;

/// Configuration options for chart generation
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Label for the X-axis
    pub x_label: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the chart in pixels
    pub width: u32,

    /// Height of the chart in pixels
    pub height: u32,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            title: "Monthly expenses".to_string(),
            x_label: "Month".to_string(),
            y_label: "Amount".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Spending per category, one value per month in `months` order.
#[derive(Clone, Debug, PartialEq)]
pub struct MonthlySeries {
    pub months: Vec<String>,
    pub series: BTreeMap<String, Vec<f64>>,
}

impl MonthlySeries {
    pub fn max_value(&self) -> f64 {
        self.series
            .values()
            .flatten()
            .copied()
            .fold(0.0, f64::max)
    }
}

/// Build one series per category over all months; months without spending are 0.
pub fn monthly_series(ledger: &ExpenseLedger) -> MonthlySeries {
    let months = ledger.months();
    let totals = ledger.monthly_totals();
    let series = ledger
        .categories()
        .into_iter()
        .map(|category| {
            let values = months
                .iter()
                .map(|m| {
                    totals
                        .get(&(m.clone(), category.clone()))
                        .copied()
                        .unwrap_or(0.0)
                })
                .collect();
            (category, values)
        })
        .collect();
    MonthlySeries { months, series }
}

fn chart_err<E: std::fmt::Display>(e: E) -> PlanError {
    PlanError::Chart(e.to_string())
}

fn label_at(labels: &[String], x: f64) -> String {
    let i = x.round();
    if (x - i).abs() > 0.01 || i < 0.0 {
        return String::new();
    }
    labels.get(i as usize).cloned().unwrap_or_default()
}

// Leave headroom above the tallest value so lines and bars don't touch the frame
fn y_upper(max: f64) -> f64 {
    if max <= 0.0 { 1.0 } else { max * 1.1 }
}

fn encode_png(buffer: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>> {
    let image = image::RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| PlanError::Chart("chart buffer has the wrong size".to_string()))?;
    let mut png = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png)
        .map_err(chart_err)?;
    Ok(png)
}

/// Line chart of monthly spending, one line per category, as PNG bytes.
pub fn render_monthly_chart(ledger: &ExpenseLedger, options: &ChartOptions) -> Result<Vec<u8>> {
    let data = monthly_series(ledger);
    if data.months.is_empty() {
        return Err(PlanError::InvalidInput("no expenses loaded".to_string()));
    }

    let mut buffer = vec![0u8; (options.width * options.height * 3) as usize];
    {
        let root =
            BitMapBackend::with_buffer(&mut buffer, (options.width, options.height)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;

        let n = data.months.len();
        let mut chart = ChartBuilder::on(&root)
            .caption(&options.title, ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), 0f64..y_upper(data.max_value()))
            .map_err(chart_err)?;

        let formatter = |x: &f64| label_at(&data.months, *x);
        chart
            .configure_mesh()
            .x_desc(&options.x_label)
            .y_desc(&options.y_label)
            .x_labels(n)
            .x_label_formatter(&formatter)
            .draw()
            .map_err(chart_err)?;

        for (idx, (category, values)) in data.series.iter().enumerate() {
            let color = Palette99::pick(idx).to_rgba();
            chart
                .draw_series(LineSeries::new(
                    values.iter().enumerate().map(|(i, v)| (i as f64, *v)),
                    color.stroke_width(2),
                ))
                .map_err(chart_err)?
                .label(category.clone())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(chart_err)?;

        root.present().map_err(chart_err)?;
    }

    encode_png(buffer, options.width, options.height)
}

/// Bar chart of spent against budget per category, as PNG bytes.
pub fn render_budget_chart(statuses: &[CategoryStatus], options: &ChartOptions) -> Result<Vec<u8>> {
    if statuses.is_empty() {
        return Err(PlanError::InvalidInput("nothing to chart".to_string()));
    }

    let labels: Vec<String> = statuses.iter().map(|s| s.category.clone()).collect();
    let max = statuses
        .iter()
        .map(|s| s.spent.max(s.budget.unwrap_or(0.0)))
        .fold(0.0, f64::max);

    let mut buffer = vec![0u8; (options.width * options.height * 3) as usize];
    {
        let root =
            BitMapBackend::with_buffer(&mut buffer, (options.width, options.height)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;

        let n = statuses.len();
        let mut chart = ChartBuilder::on(&root)
            .caption(&options.title, ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), 0f64..y_upper(max))
            .map_err(chart_err)?;

        let formatter = |x: &f64| label_at(&labels, *x);
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc(&options.x_label)
            .y_desc(&options.y_label)
            .x_labels(n)
            .x_label_formatter(&formatter)
            .draw()
            .map_err(chart_err)?;

        chart
            .draw_series(statuses.iter().enumerate().map(|(i, s)| {
                let x = i as f64;
                let color = if s.is_over() { RED } else { BLUE };
                Rectangle::new([(x - 0.35, 0.0), (x, s.spent)], color.filled())
            }))
            .map_err(chart_err)?
            .label("Spent")
            .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], BLUE.filled()));

        chart
            .draw_series(statuses.iter().enumerate().filter_map(|(i, s)| {
                let x = i as f64;
                s.budget
                    .map(|b| Rectangle::new([(x, 0.0), (x + 0.35, b)], GREEN.mix(0.6).filled()))
            }))
            .map_err(chart_err)?
            .label("Budget")
            .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], GREEN.mix(0.6).filled()));

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(chart_err)?;

        root.present().map_err(chart_err)?;
    }

    encode_png(buffer, options.width, options.height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expense::ExpenseRow;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn series_fill_missing_months_with_zero() {
        let mut ledger = ExpenseLedger::new();
        ledger.merge(vec![
            ExpenseRow::new(d(2024, 1, 5), "Food", 10.0),
            ExpenseRow::new(d(2024, 2, 5), "Rent", 700.0),
            ExpenseRow::new(d(2024, 3, 5), "Food", 15.0),
            ExpenseRow::new(d(2024, 3, 6), "Food", 5.0),
        ]);
        let data = monthly_series(&ledger);
        assert_eq!(data.months, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(data.series["Food"], vec![10.0, 0.0, 20.0]);
        assert_eq!(data.series["Rent"], vec![0.0, 700.0, 0.0]);
        assert_eq!(data.max_value(), 700.0);
    }

    #[test]
    fn labels_only_on_whole_positions() {
        let labels = vec!["2024-01".to_string(), "2024-02".to_string()];
        assert_eq!(label_at(&labels, 1.0), "2024-02");
        assert_eq!(label_at(&labels, 0.5), "");
        assert_eq!(label_at(&labels, -1.0), "");
        assert_eq!(label_at(&labels, 5.0), "");
    }

    #[test]
    fn empty_ledger_cannot_be_charted() {
        let err = render_monthly_chart(&ExpenseLedger::new(), &ChartOptions::default()).unwrap_err();
        assert!(err.is_input_error());
    }
}
