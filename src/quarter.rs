use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::fmt;

/// A calendar quarter. Year 0 or quarter 0 marks a value that could not be parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Quarter {
    pub year: i32,
    pub quarter: u32,
}

impl Quarter {
    pub fn new(year: i32, quarter: u32) -> Self {
        Quarter { year, quarter }
    }

    /// Parse a text-encoded quarter such as `FY25Q3` or `2025Q3`.
    ///
    /// The year is `20` followed by the third and fourth characters and the
    /// quarter is the sixth character. Either part falls back to 0 when it is
    /// not a number, so `"FY25-Q3"` yields year 2025 and quarter 0.
    pub fn parse(text: &str) -> Self {
        let chars: Vec<char> = text.trim().chars().collect();

        let year = chars
            .get(2..4)
            .map(|yy| yy.iter().collect::<String>())
            .filter(|yy| yy.chars().all(|c| c.is_ascii_digit()))
            .and_then(|yy| format!("20{}", yy).parse::<i32>().ok())
            .unwrap_or(0);

        let quarter = chars
            .get(5)
            .and_then(|c| c.to_digit(10))
            .unwrap_or(0);

        Quarter { year, quarter }
    }

    pub fn containing(date: NaiveDate) -> Self {
        Quarter {
            year: date.year(),
            quarter: (date.month() - 1) / 3 + 1,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.year > 0 && (1..=4).contains(&self.quarter)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

/// Inclusive range of quarters from the current one through `n` quarters ahead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QuarterWindow {
    pub start: Quarter,
    pub end: Quarter,
}

impl QuarterWindow {
    pub fn ahead(today: NaiveDate, quarters: u32) -> Self {
        let start = Quarter::containing(today);
        let mut end_year = start.year + ((start.quarter + quarters) / 4) as i32;
        let mut end_quarter = (start.quarter + quarters) % 4;
        if end_quarter == 0 {
            end_quarter = 4;
            end_year -= 1;
        }
        QuarterWindow {
            start,
            end: Quarter::new(end_year, end_quarter),
        }
    }

    /// Whether `q` lies inside the window, bounds included.
    pub fn contains(&self, q: Quarter) -> bool {
        q.is_valid() && ordinal(self.start) <= ordinal(q) && ordinal(q) <= ordinal(self.end)
    }
}

fn ordinal(q: Quarter) -> i64 {
    q.year as i64 * 4 + q.quarter as i64 - 1
}

impl fmt::Display for QuarterWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
