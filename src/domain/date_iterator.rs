//! Walk-forward date partitioning.

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Monthly,
    Quarterly,
}

impl Frequency {
    pub fn months(self) -> u32 {
        match self {
            Frequency::Monthly => 1,
            Frequency::Quarterly => 3,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "monthly" | "month" | "m" => Some(Frequency::Monthly),
            "quarterly" | "quarter" | "q" => Some(Frequency::Quarterly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateParameters {
    pub frequency: Frequency,
    pub month_offset: u32,
    pub train_periods: usize,
    pub test_periods: usize,
    pub start_year: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub train_start: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
}

impl PeriodWindow {
    /// Rows dated after this are test rows.
    pub fn filter_date(&self) -> NaiveDate {
        self.test_start - Duration::days(1)
    }
}

/// Anchor dates from January of `start_year - 1` (shifted by the month
/// offset) through the first anchor after `now`.
pub fn anchors(params: &DateParameters, now: NaiveDate) -> Vec<NaiveDate> {
    let Some(first) = NaiveDate::from_ymd_opt(params.start_year - 1, 1, 1)
        .and_then(|d| d.checked_add_months(Months::new(params.month_offset)))
    else {
        return Vec::new();
    };
    let step = Months::new(params.frequency.months());

    let mut out = vec![first];
    let mut current = first;
    while current <= now {
        match current.checked_add_months(step) {
            Some(next) => {
                out.push(next);
                current = next;
            }
            None => break,
        }
    }
    out
}

/// Overlapping (train_start, test_start, test_end) windows whose test period
/// has started by `now`.
pub fn period_windows(params: &DateParameters, now: NaiveDate) -> Vec<PeriodWindow> {
    let a = anchors(params, now);
    let span = params.train_periods + params.test_periods;
    let mut out = Vec::new();
    let mut k = 0;
    while k + span < a.len() {
        let test_start = a[k + params.train_periods];
        if test_start > now {
            break;
        }
        out.push(PeriodWindow {
            train_start: a[k],
            test_start,
            test_end: a[k + span] - Duration::days(1),
        });
        k += 1;
    }
    out
}

/// Single window covering January 1 of `start_year` through `now`, with
/// every row a test row.
pub fn full_history_window(start_year: i32, now: NaiveDate) -> Option<PeriodWindow> {
    let start = NaiveDate::from_ymd_opt(start_year, 1, 1)?;
    if start > now {
        return None;
    }
    Some(PeriodWindow {
        train_start: start,
        test_start: start,
        test_end: now,
    })
}

/// `YYYY-MM-DD` of the period's test start, used as its file stem.
pub fn period_name(window: &PeriodWindow) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        window.test_start.year(),
        window.test_start.month(),
        window.test_start.day()
    )
}
