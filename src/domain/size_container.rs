//! Rolling holding-period size accumulator.
//!
//! Each day's incremental sizes are kept for `n_days` updates; a symbol's
//! current size is the sum of its retained increments, so a selection decays
//! to zero `n_days` days after it was last made.

use crate::domain::error::QuantwalkError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedSizes {
    pub date: NaiveDate,
    pub sizes: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeContainer {
    n_days: usize,
    window: VecDeque<DatedSizes>,
}

impl SizeContainer {
    pub fn new(n_days: usize) -> Self {
        Self {
            n_days: n_days.max(1),
            window: VecDeque::new(),
        }
    }

    pub fn n_days(&self) -> usize {
        self.n_days
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.window.iter().map(|d| d.date).collect()
    }

    /// Record `sizes` for `date`, replacing an entry for the same date, then
    /// evict everything older than the last `n_days` dates.
    pub fn update_sizes(&mut self, date: NaiveDate, sizes: BTreeMap<String, f64>) {
        if let Some(last) = self.window.back_mut() {
            if last.date == date {
                last.sizes = sizes;
                return;
            }
        }
        self.window.push_back(DatedSizes { date, sizes });
        while self.window.len() > self.n_days {
            self.window.pop_front();
        }
    }

    /// Summed size per symbol over the retained dates.
    pub fn get_sizes(&self) -> BTreeMap<String, f64> {
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for day in &self.window {
            for (symbol, size) in &day.sizes {
                *totals.entry(symbol.clone()).or_insert(0.0) += size;
            }
        }
        totals
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn to_json(&self) -> Result<String, QuantwalkError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, QuantwalkError> {
        let mut container: SizeContainer = serde_json::from_str(text)?;
        container.n_days = container.n_days.max(1);
        while container.window.len() > container.n_days {
            container.window.pop_front();
        }
        Ok(container)
    }
}
