//! Per-period feature/response container.
//!
//! Training rows accumulate across periods in an arena keyed by the period's
//! time index; the current period's rows replace the previous test buffer.
//! `prep_data` turns both into ranked feature matrices plus training
//! responses for one hyperparameter combination.

use crate::domain::earnings::{anchor_returns, earnings_blackout, EarningsParams};
use crate::domain::error::QuantwalkError;
use crate::domain::feature::parse_mnemonic;
use crate::domain::period::PeriodFrame;
use crate::domain::ranking::{outlier_rank, pct_rank_by_date, smoothed_responses, MISSING_RANK};
use chrono::NaiveDate;
use std::collections::BTreeMap;

pub const EARNINGS_FLAG_COLUMN: &str = "EarningsFlag";
pub const EARNINGS_BLACKOUT_FEATURE: &str = "EarningsBlackout";
pub const ANCHOR_RETURN_FEATURE: &str = "AnchorReturnRank";

#[derive(Debug, Clone, PartialEq)]
pub struct PrepParams {
    /// `None` keeps every retained training period.
    pub training_qtrs: Option<usize>,
    /// Raw columns to rank; empty selects every non-forward-looking feature.
    pub features: Vec<String>,
    pub response_column: String,
    pub response_days: Vec<usize>,
    pub response_thresh: f64,
    pub extreme_cutoff: f64,
    pub earnings: Option<EarningsParams>,
}

impl Default for PrepParams {
    fn default() -> Self {
        Self {
            training_qtrs: None,
            features: Vec::new(),
            response_column: "AdjClose".into(),
            response_days: vec![2, 4, 6],
            response_thresh: 0.3,
            extreme_cutoff: 0.05,
            earnings: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    pub sec_codes: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedData {
    pub train: FeatureMatrix,
    pub train_response: Vec<f64>,
    pub test: FeatureMatrix,
    pub features: Vec<String>,
}

pub trait DataContainer {
    fn add_data(&mut self, frame: PeriodFrame, time_index: usize) -> Result<(), QuantwalkError>;

    fn prep_data(&self, time_index: usize, params: &PrepParams) -> Result<PreparedData, QuantwalkError>;

    /// Training rows within the trailing `training_qtrs` of `time_index`.
    fn train_rows(&self, time_index: usize, training_qtrs: Option<usize>) -> PeriodFrame;

    fn test_frame(&self) -> Option<&PeriodFrame>;
}

#[derive(Debug, Clone, Default)]
pub struct RollingContainer {
    arena: BTreeMap<usize, PeriodFrame>,
    current: Option<PeriodFrame>,
    test: Option<PeriodFrame>,
    latest_train_date: Option<NaiveDate>,
    retention: Option<usize>,
    max_index: Option<usize>,
}

impl RollingContainer {
    /// `retention` bounds how many trailing periods the arena keeps.
    pub fn new(retention: Option<usize>) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    /// The full current period, training rows included.
    pub fn current_frame(&self) -> Option<&PeriodFrame> {
        self.current.as_ref()
    }

    pub fn retained_indices(&self) -> Vec<usize> {
        self.arena.keys().copied().collect()
    }

    fn evict(&mut self) {
        let floor = match (self.retention, self.max_index) {
            (Some(keep), Some(max)) => max.checked_sub(keep.max(1)),
            _ => None,
        };
        if let Some(floor) = floor {
            self.arena.retain(|&k, _| k > floor);
        }
    }
}

fn auto_features(frame: &PeriodFrame) -> Vec<String> {
    frame
        .columns
        .iter()
        .filter(|c| {
            parse_mnemonic(c)
                .map(|d| !d.manipulation.is_some_and(|m| m.is_forward_looking()))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

fn require_column(frame: &PeriodFrame, name: &str) -> Result<Vec<Option<f64>>, QuantwalkError> {
    frame.column(name).ok_or_else(|| QuantwalkError::InvalidState {
        reason: format!("column '{}' is not in the period data", name),
    })
}

fn feature_names(features: &[String], params: &PrepParams) -> Vec<String> {
    let mut names = Vec::with_capacity(features.len() * 2 + 2);
    for f in features {
        names.push(f.clone());
        names.push(format!("{}_extreme", f));
    }
    if params.earnings.is_some() {
        names.push(EARNINGS_BLACKOUT_FEATURE.into());
        names.push(ANCHOR_RETURN_FEATURE.into());
    }
    names
}

/// Ranked feature columns for every row of `frame`, column-major.
fn ranked_columns(
    frame: &PeriodFrame,
    features: &[String],
    params: &PrepParams,
) -> Result<Vec<Vec<f64>>, QuantwalkError> {
    let dates: Vec<NaiveDate> = frame.rows.iter().map(|r| r.date).collect();
    let mut columns = Vec::with_capacity(features.len() * 2 + 2);
    for f in features {
        let raw = require_column(frame, f)?;
        let (ranked, extreme) = outlier_rank(&dates, &raw, params.extreme_cutoff);
        columns.push(ranked);
        columns.push(extreme);
    }
    if let Some(earnings) = &params.earnings {
        let secs: Vec<String> = frame.rows.iter().map(|r| r.sec_code.clone()).collect();
        let flags = require_column(frame, EARNINGS_FLAG_COLUMN)?;
        let closes = require_column(frame, &params.response_column)?;
        columns.push(earnings_blackout(&secs, &flags, earnings.offsets));
        let moves = anchor_returns(&secs, &closes, &flags, earnings);
        columns.push(
            pct_rank_by_date(&dates, &moves)
                .into_iter()
                .map(|r| r.unwrap_or(MISSING_RANK))
                .collect(),
        );
    }
    Ok(columns)
}

fn to_matrix<F: Fn(usize) -> bool>(frame: &PeriodFrame, columns: &[Vec<f64>], keep: F) -> FeatureMatrix {
    let mut m = FeatureMatrix::default();
    for (i, row) in frame.rows.iter().enumerate() {
        if !keep(i) {
            continue;
        }
        m.sec_codes.push(row.sec_code.clone());
        m.dates.push(row.date);
        m.values.push(columns.iter().map(|c| c[i]).collect());
    }
    m
}

impl DataContainer for RollingContainer {
    fn add_data(&mut self, frame: PeriodFrame, time_index: usize) -> Result<(), QuantwalkError> {
        if let Some(max) = self.max_index {
            if time_index < max {
                return Err(QuantwalkError::InvalidState {
                    reason: format!("time index {} precedes {}", time_index, max),
                });
            }
        }

        let latest = self.latest_train_date;
        let fresh = frame.filter(|r| !r.test_flag && latest.is_none_or(|l| r.date > l));
        if !fresh.is_empty() {
            self.latest_train_date = self.latest_train_date.max(fresh.max_date());
            match self.arena.get_mut(&time_index) {
                Some(existing) => existing.append(&fresh),
                None => {
                    self.arena.insert(time_index, fresh);
                }
            }
        }

        self.test = Some(frame.test_rows());
        self.current = Some(frame);
        self.max_index = Some(self.max_index.map_or(time_index, |m| m.max(time_index)));
        self.evict();
        Ok(())
    }

    fn train_rows(&self, time_index: usize, training_qtrs: Option<usize>) -> PeriodFrame {
        let lowest_excluded = training_qtrs.and_then(|q| time_index.checked_sub(q));
        let mut out: Option<PeriodFrame> = None;
        for (&k, frame) in self.arena.range(..=time_index) {
            if lowest_excluded.is_some_and(|floor| k <= floor) {
                continue;
            }
            match out.as_mut() {
                Some(acc) => acc.append(frame),
                None => out = Some(frame.clone()),
            }
        }
        let mut out = out.unwrap_or_default();
        out.sort();
        out
    }

    fn test_frame(&self) -> Option<&PeriodFrame> {
        self.test.as_ref()
    }

    fn prep_data(&self, time_index: usize, params: &PrepParams) -> Result<PreparedData, QuantwalkError> {
        let Some(current) = self.current.as_ref() else {
            return Ok(PreparedData::default());
        };
        let features = if params.features.is_empty() {
            auto_features(current)
        } else {
            params.features.clone()
        };

        let train = self.train_rows(time_index, params.training_qtrs);
        let (train_matrix, train_response) = if train.is_empty() {
            (FeatureMatrix::default(), Vec::new())
        } else {
            let secs: Vec<String> = train.rows.iter().map(|r| r.sec_code.clone()).collect();
            let dates: Vec<NaiveDate> = train.rows.iter().map(|r| r.date).collect();
            let prices = require_column(&train, &params.response_column)?;
            let responses = smoothed_responses(
                &secs,
                &dates,
                &prices,
                &params.response_days,
                params.response_thresh,
            );
            let columns = ranked_columns(&train, &features, params)?;
            let matrix = to_matrix(&train, &columns, |i| responses[i].is_some());
            let labels: Vec<f64> = responses.into_iter().flatten().collect();
            (matrix, labels)
        };

        let test_matrix = if current.test_count() == 0 {
            FeatureMatrix::default()
        } else {
            let columns = ranked_columns(current, &features, params)?;
            to_matrix(current, &columns, |i| current.rows[i].test_flag)
        };

        Ok(PreparedData {
            train: train_matrix,
            train_response,
            test: test_matrix,
            features: feature_names(&features, params),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::period::PeriodRow;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, m, day).unwrap()
    }

    fn frame(rows: &[(&str, NaiveDate, bool, f64)]) -> PeriodFrame {
        let mut f = PeriodFrame::new(vec!["AdjClose".into(), "LEAD1_AdjClose".into()]);
        for (sec, date, test, price) in rows {
            f.push(PeriodRow {
                sec_code: sec.to_string(),
                date: *date,
                test_flag: *test,
                values: vec![Some(*price), Some(*price)],
            });
        }
        f
    }

    #[test]
    fn training_rows_append_only_newer_dates() {
        let mut c = RollingContainer::new(None);
        c.add_data(frame(&[("1", d(1, 1), false, 1.0), ("1", d(1, 2), true, 2.0)]), 0)
            .unwrap();
        c.add_data(
            frame(&[
                ("1", d(1, 1), false, 1.0),
                ("1", d(1, 2), false, 2.0),
                ("1", d(1, 3), true, 3.0),
            ]),
            1,
        )
        .unwrap();
        let train = c.train_rows(1, None);
        assert_eq!(train.len(), 2);
        assert!(train.ensure_unique().is_ok());
        assert_eq!(c.test_frame().unwrap().len(), 1);
        assert_eq!(c.test_frame().unwrap().rows[0].date, d(1, 3));
    }

    #[test]
    fn trim_keeps_trailing_quarters() {
        let prices = [10.0, 9.0, 5.0, 5.0, 10.0, 4.0];
        let mut c = RollingContainer::new(None);
        for q in 0..3 {
            let rows = [
                ("1", d(q as u32 + 1, 1), false, prices[q * 2]),
                ("1", d(q as u32 + 1, 2), false, prices[q * 2 + 1]),
                ("1", d(q as u32 + 1, 3), true, 1.0),
            ];
            c.add_data(frame(&rows), q).unwrap();
        }
        assert_eq!(c.train_rows(2, None).len(), 6);
        let trimmed = c.train_rows(2, Some(1));
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed.column("AdjClose").unwrap(), vec![Some(10.0), Some(4.0)]);
        assert_eq!(c.train_rows(2, Some(2)).len(), 4);
    }

    #[test]
    fn arena_evicts_beyond_retention() {
        let mut c = RollingContainer::new(Some(2));
        for q in 0..4 {
            c.add_data(frame(&[("1", d(q as u32 + 1, 1), false, 1.0)]), q).unwrap();
        }
        assert_eq!(c.retained_indices(), vec![2, 3]);
    }

    #[test]
    fn time_index_must_not_go_backwards() {
        let mut c = RollingContainer::new(None);
        c.add_data(frame(&[("1", d(1, 1), false, 1.0)]), 3).unwrap();
        assert!(c.add_data(frame(&[("1", d(2, 1), false, 1.0)]), 2).is_err());
    }

    #[test]
    fn prep_data_ranks_and_labels() {
        let mut rows = Vec::new();
        for (sec, end) in [("1", 103.0), ("2", 101.0), ("3", 110.0), ("4", 90.0)] {
            rows.push((sec, d(1, 1), false, 100.0));
            rows.push((sec, d(1, 2), false, 100.0));
            rows.push((sec, d(1, 3), false, end));
            rows.push((sec, d(1, 4), true, end));
        }
        let mut c = RollingContainer::new(None);
        c.add_data(frame(&rows), 0).unwrap();
        let params = PrepParams {
            response_days: vec![2],
            response_thresh: 0.25,
            ..PrepParams::default()
        };
        let prepared = c.prep_data(0, &params).unwrap();

        // LEAD features are excluded automatically.
        assert_eq!(prepared.features, vec!["AdjClose", "AdjClose_extreme"]);
        assert_eq!(prepared.train.len(), 4);
        assert_eq!(prepared.train_response, vec![0.0, 0.0, 1.0, -1.0]);
        assert_eq!(prepared.test.len(), 4);
        assert!(prepared.test.dates.iter().all(|dt| *dt == d(1, 4)));
    }

    #[test]
    fn empty_container_prepares_nothing() {
        let c = RollingContainer::new(None);
        let prepared = c.prep_data(0, &PrepParams::default()).unwrap();
        assert!(prepared.train.is_empty());
        assert!(prepared.test.is_empty());
    }

    #[test]
    fn missing_response_column_is_reported() {
        let mut c = RollingContainer::new(None);
        c.add_data(frame(&[("1", d(1, 1), false, 1.0), ("1", d(1, 2), true, 1.0)]), 0)
            .unwrap();
        let params = PrepParams {
            response_column: "RClose".into(),
            ..PrepParams::default()
        };
        assert!(matches!(
            c.prep_data(0, &params),
            Err(QuantwalkError::InvalidState { .. })
        ));
    }
}
