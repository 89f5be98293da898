//! In-memory feature evaluation with the same numeric semantics as the
//! compiled SQL: trailing windows inclusive of the current row, partial
//! windows at the start of a series, sample standard deviation, and NTILE
//! buckets per date.

use crate::domain::earnings::security_runs;
use crate::domain::error::QuantwalkError;
use crate::domain::feature::{FeatureDescriptor, Manipulation, WindowVariable};
use crate::domain::feature_sql::FeatureCompiler;
use crate::domain::period::{PeriodFrame, PeriodRow};
use crate::domain::ranking::group_by_date;
use chrono::NaiveDate;
use std::ops::Range;

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn sample_stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.max(0.0).sqrt())
}

fn non_zero(v: f64) -> Option<f64> {
    if v == 0.0 { None } else { Some(v) }
}

/// 1-based NTILE bucket of position `p` among `m` ordered rows.
pub fn ntile(p: usize, m: usize, n: usize) -> usize {
    let q = m / n;
    let r = m % n;
    if p < r * (q + 1) {
        p / (q + 1) + 1
    } else {
        r + (p - r * (q + 1)) / q.max(1) + 1
    }
}

fn stage_raw(d: &FeatureDescriptor, base: &[Option<f64>], run: &Range<usize>) -> Vec<Option<f64>> {
    match d.window {
        Some(WindowVariable::Vol(_)) => run
            .clone()
            .map(|i| {
                if i == run.start {
                    return None;
                }
                let prev = base[i - 1].and_then(non_zero)?;
                base[i].map(|x| x / prev)
            })
            .collect(),
        _ => base[run.clone()].to_vec(),
    }
}

fn stage_window(d: &FeatureDescriptor, input: &[Option<f64>]) -> Vec<Option<f64>> {
    let window = match d.window {
        Some(w) => w,
        None => return input.to_vec(),
    };
    let len = window.length().max(1);
    (0..input.len())
        .map(|i| {
            let lo = (i + 1).saturating_sub(len);
            let present: Vec<f64> = input[lo..=i].iter().flatten().copied().collect();
            let x = input[i];
            match window {
                WindowVariable::Ma(_) => mean(&present),
                WindowVariable::Prma(_) => {
                    let avg = mean(&present).and_then(non_zero)?;
                    x.map(|v| v / avg)
                }
                WindowVariable::Vol(_) => sample_stdev(&present),
                WindowVariable::Boll(_) => {
                    let sd = sample_stdev(&present).and_then(non_zero)?;
                    let avg = mean(&present)?;
                    x.map(|v| ((v - (avg - 2.0 * sd)) / (4.0 * sd)).clamp(0.0, 1.0))
                }
            }
        })
        .collect()
}

fn shift(input: &[Option<f64>], offset: isize) -> Vec<Option<f64>> {
    (0..input.len() as isize)
        .map(|i| {
            let j = i + offset;
            if j < 0 || j >= input.len() as isize {
                None
            } else {
                input[j as usize]
            }
        })
        .collect()
}

fn shift_runs(input: &[Option<f64>], runs: &[Range<usize>], offset: isize) -> Vec<Option<f64>> {
    let mut out = vec![None; input.len()];
    for run in runs {
        out[run.clone()].copy_from_slice(&shift(&input[run.clone()], offset));
    }
    out
}

fn rank_by_date(dates: &[NaiveDate], values: &[Option<f64>], n: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for idx in group_by_date(dates).values() {
        let mut present: Vec<usize> = idx.iter().copied().filter(|&i| values[i].is_some()).collect();
        present.sort_by(|&a, &b| {
            let (x, y) = (values[a].unwrap_or(0.0), values[b].unwrap_or(0.0));
            x.total_cmp(&y).then(a.cmp(&b))
        });
        let m = present.len();
        for (p, &i) in present.iter().enumerate() {
            out[i] = Some(ntile(p, m, n.max(1)) as f64);
        }
    }
    out
}

/// Evaluate `features` over `frame`, which carries base columns named by
/// table column (`AdjClose`, `Close`, `AvgDolVol`, ...). The result has the
/// same rows and flags, with passthrough columns followed by one column per
/// mnemonic.
pub fn evaluate(
    features: &[FeatureDescriptor],
    frame: &PeriodFrame,
    live: bool,
) -> Result<PeriodFrame, QuantwalkError> {
    let mut sorted = frame.clone();
    if !sorted.is_sorted() {
        sorted.sort();
        sorted.ensure_unique()?;
    }
    let sec_codes: Vec<String> = sorted.rows.iter().map(|r| r.sec_code.clone()).collect();
    let runs = security_runs(&sec_codes);
    let dates: Vec<NaiveDate> = sorted.rows.iter().map(|r| r.date).collect();

    let base_column = |name: &str| -> Result<Vec<Option<f64>>, QuantwalkError> {
        sorted.column(name).ok_or_else(|| QuantwalkError::InvalidState {
            reason: format!("base column '{}' is not available for evaluation", name),
        })
    };

    let mut out = PeriodFrame::new(Vec::new());
    out.rows = sorted
        .rows
        .iter()
        .map(|r| PeriodRow {
            sec_code: r.sec_code.clone(),
            date: r.date,
            test_flag: r.test_flag,
            values: Vec::new(),
        })
        .collect();

    for (col, alias) in FeatureCompiler::passthrough_columns(features) {
        out.add_column(&alias, base_column(&col)?)?;
    }

    for d in features {
        let base = base_column(&d.base.column_name())?;
        let mut windowed = vec![None; base.len()];
        for run in &runs {
            let raw = stage_raw(d, &base, run);
            windowed[run.clone()].copy_from_slice(&stage_window(d, &raw));
        }

        let values = match d.manipulation {
            None => windowed,
            Some(Manipulation::Lead(_)) if live => vec![None; base.len()],
            Some(Manipulation::Lag(n)) => shift_runs(&windowed, &runs, -(n as isize)),
            Some(Manipulation::Lead(n)) => shift_runs(&windowed, &runs, n as isize),
            Some(Manipulation::Rank(n)) => rank_by_date(&dates, &windowed, n),
        };
        out.add_column(&d.mnemonic, values)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::feature::parse_feature_list;
    use approx::assert_relative_eq;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn frame(series: &[(&str, &[f64])]) -> PeriodFrame {
        let mut f = PeriodFrame::new(vec!["AdjClose".into()]);
        for (sec, closes) in series {
            for (i, c) in closes.iter().enumerate() {
                f.push(PeriodRow {
                    sec_code: sec.to_string(),
                    date: d(i as u32 + 1),
                    test_flag: false,
                    values: vec![Some(*c)],
                });
            }
        }
        f.sort();
        f
    }

    fn eval(features: &[&str], f: &PeriodFrame, live: bool) -> PeriodFrame {
        evaluate(&parse_feature_list(features).unwrap(), f, live).unwrap()
    }

    #[test]
    fn ntile_buckets_match_sql() {
        // 5 rows into 2 buckets: 3 then 2.
        let buckets: Vec<usize> = (0..5).map(|p| ntile(p, 5, 2)).collect();
        assert_eq!(buckets, vec![1, 1, 1, 2, 2]);
        // more buckets than rows: one per row
        let buckets: Vec<usize> = (0..3).map(|p| ntile(p, 3, 10)).collect();
        assert_eq!(buckets, vec![1, 2, 3]);
    }

    #[test]
    fn moving_average_uses_partial_windows() {
        let f = frame(&[("1", &[2.0, 4.0, 6.0, 8.0])]);
        let out = eval(&["MA3_AdjClose"], &f, false);
        let ma = out.column("MA3_AdjClose").unwrap();
        assert_eq!(ma, vec![Some(2.0), Some(3.0), Some(4.0), Some(6.0)]);
        // passthrough of the base column
        assert_eq!(out.columns, vec!["AdjClose", "MA3_AdjClose"]);
    }

    #[test]
    fn lag_and_lead_stay_within_security() {
        let f = frame(&[("1", &[1.0, 2.0, 3.0]), ("2", &[10.0, 20.0, 30.0])]);
        let out = eval(&["LAG1_AdjClose", "LEAD1_AdjClose"], &f, false);
        let lag = out.column("LAG1_AdjClose").unwrap();
        let lead = out.column("LEAD1_AdjClose").unwrap();
        assert_eq!(lag, vec![None, Some(1.0), Some(2.0), None, Some(10.0), Some(20.0)]);
        assert_eq!(lead, vec![Some(2.0), Some(3.0), None, Some(20.0), Some(30.0), None]);

        let live = eval(&["LEAD1_AdjClose"], &f, true);
        assert!(live.column("LEAD1_AdjClose").unwrap().iter().all(|v| v.is_none()));
    }

    #[test]
    fn vol_is_stdev_of_ratio() {
        let f = frame(&[("1", &[100.0, 110.0, 99.0])]);
        let out = eval(&["VOL2_AdjClose"], &f, false);
        let vol = out.column("VOL2_AdjClose").unwrap();
        assert_eq!(vol[0], None);
        assert_eq!(vol[1], None);
        let (a, b) = (1.1_f64, 0.9_f64);
        let m = (a + b) / 2.0;
        let expected = (((a - m).powi(2) + (b - m).powi(2)) / 1.0).sqrt();
        assert_relative_eq!(vol[2].unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn bollinger_is_clamped() {
        let f = frame(&[("1", &[10.0, 10.0, 10.0, 50.0])]);
        let out = eval(&["BOLL3_AdjClose"], &f, false);
        let boll = out.column("BOLL3_AdjClose").unwrap();
        // constant window: zero stdev
        assert_eq!(boll[2], None);
        let v = boll[3].unwrap();
        assert!((0.0..=1.0).contains(&v));
    }

    #[test]
    fn rank_is_cross_sectional_ntile() {
        let f = frame(&[
            ("1", &[5.0]),
            ("2", &[1.0]),
            ("3", &[3.0]),
            ("4", &[4.0]),
        ]);
        let out = eval(&["RANK2_AdjClose"], &f, false);
        let rank = out.column("RANK2_AdjClose").unwrap();
        assert_eq!(rank, vec![Some(2.0), Some(1.0), Some(1.0), Some(2.0)]);
    }

    #[test]
    fn missing_base_column_is_an_error() {
        let f = frame(&[("1", &[1.0])]);
        let features = parse_feature_list(&["RClose"]).unwrap();
        assert!(matches!(
            evaluate(&features, &f, false),
            Err(QuantwalkError::InvalidState { .. })
        ));
    }
}
