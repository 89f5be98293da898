//! Period records: one row per (SecCode, Date) with a train/test flag and
//! named numeric columns.

use crate::domain::error::QuantwalkError;
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Order SecCodes numerically when both parse as integers, lexically
/// otherwise.
pub fn cmp_sec_codes(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodRow {
    pub sec_code: String,
    pub date: NaiveDate,
    pub test_flag: bool,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodFrame {
    pub columns: Vec<String>,
    pub rows: Vec<PeriodRow>,
}

impl PeriodFrame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.values.get(idx).copied().flatten())
    }

    /// All values of one column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r.values.get(idx).copied().flatten()).collect())
    }

    pub fn push(&mut self, row: PeriodRow) {
        self.rows.push(row);
    }

    pub fn sort(&mut self) {
        self.rows.sort_by(|a, b| {
            cmp_sec_codes(&a.sec_code, &b.sec_code).then_with(|| a.date.cmp(&b.date))
        });
    }

    /// Fails on the first repeated (SecCode, Date); rows must already be
    /// sorted.
    pub fn ensure_unique(&self) -> Result<(), QuantwalkError> {
        for pair in self.rows.windows(2) {
            if pair[0].sec_code == pair[1].sec_code && pair[0].date == pair[1].date {
                return Err(QuantwalkError::DuplicateRows {
                    sec_code: pair[1].sec_code.clone(),
                    date: pair[1].date,
                });
            }
        }
        Ok(())
    }

    pub fn is_sorted(&self) -> bool {
        self.rows.windows(2).all(|p| {
            cmp_sec_codes(&p[0].sec_code, &p[1].sec_code)
                .then_with(|| p[0].date.cmp(&p[1].date))
                == Ordering::Less
        })
    }

    pub fn test_count(&self) -> usize {
        self.rows.iter().filter(|r| r.test_flag).count()
    }

    pub fn max_date(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|r| r.date).max()
    }

    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    pub fn test_dates(&self) -> BTreeSet<NaiveDate> {
        self.rows.iter().filter(|r| r.test_flag).map(|r| r.date).collect()
    }

    /// Rows matching `keep`, same columns.
    pub fn filter<F: Fn(&PeriodRow) -> bool>(&self, keep: F) -> PeriodFrame {
        PeriodFrame {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    pub fn test_rows(&self) -> PeriodFrame {
        self.filter(|r| r.test_flag)
    }

    pub fn train_rows(&self) -> PeriodFrame {
        self.filter(|r| !r.test_flag)
    }

    /// Appends `other`'s rows, remapping its columns by name. Columns absent
    /// from `other` are filled with missing values.
    pub fn append(&mut self, other: &PeriodFrame) {
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.column_index(c))
            .collect();
        for row in &other.rows {
            let values = mapping
                .iter()
                .map(|m| m.and_then(|i| row.values.get(i).copied().flatten()))
                .collect();
            self.rows.push(PeriodRow {
                sec_code: row.sec_code.clone(),
                date: row.date,
                test_flag: row.test_flag,
                values,
            });
        }
    }

    /// Adds a column, filled from `values` (must match the row count).
    pub fn add_column(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<(), QuantwalkError> {
        if values.len() != self.rows.len() {
            return Err(QuantwalkError::InvalidState {
                reason: format!(
                    "column '{}' has {} values for {} rows",
                    name,
                    values.len(),
                    self.rows.len()
                ),
            });
        }
        self.columns.push(name.to_string());
        for (row, v) in self.rows.iter_mut().zip(values) {
            row.values.push(v);
        }
        Ok(())
    }
}
