//! Calendar month keys ("YYYY-MM") and their date windows

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};

/// Timestamp layout used by the CRM
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A month and its half-open `[start, end)` date range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthWindow {
    pub key: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl MonthWindow {
    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

/// Every month from the epoch month through the month containing `today`
pub fn month_windows(epoch: NaiveDate, today: NaiveDate) -> Vec<MonthWindow> {
    let mut windows = Vec::new();
    let (Some(mut start), Some(last)) = (epoch.with_day(1), today.with_day(1)) else {
        return windows;
    };

    while start <= last {
        let Some(end) = start.checked_add_months(Months::new(1)) else {
            break;
        };
        windows.push(MonthWindow {
            key: start.format("%Y-%m").to_string(),
            start,
            end,
        });
        start = end;
    }

    windows
}

/// Month key of a CRM timestamp, taken as-is without timezone conversion
pub fn month_key(timestamp: &str) -> Option<String> {
    let parsed = NaiveDateTime::parse_from_str(timestamp.trim(), TIMESTAMP_FORMAT).ok()?;
    Some(format!("{}-{:02}", parsed.year(), parsed.month()))
}
