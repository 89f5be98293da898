//! Cross-sectional ranking helpers.

use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Neutral rank assigned to missing values.
pub const MISSING_RANK: f64 = 0.5;

/// Row indices grouped by date.
pub fn group_by_date(dates: &[NaiveDate]) -> BTreeMap<NaiveDate, Vec<usize>> {
    let mut groups: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (i, d) in dates.iter().enumerate() {
        groups.entry(*d).or_default().push(i);
    }
    groups
}

/// Ordinal percentile rank (`rank / n`) of the present values; ties keep row
/// order. Missing values stay missing.
pub fn pct_rank(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut present: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|x| (i, x)))
        .collect();
    present.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    let n = present.len() as f64;
    let mut out = vec![None; values.len()];
    for (rank, (i, _)) in present.into_iter().enumerate() {
        out[i] = Some((rank + 1) as f64 / n);
    }
    out
}

/// Apply `pct_rank` within each date.
pub fn pct_rank_by_date(dates: &[NaiveDate], values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for indices in group_by_date(dates).values() {
        let slice: Vec<Option<f64>> = indices.iter().map(|&i| values[i]).collect();
        for (&i, r) in indices.iter().zip(pct_rank(&slice)) {
            out[i] = r;
        }
    }
    out
}

/// Per-date percentile rank with missing values at [`MISSING_RANK`], plus a
/// flag for ranks in either tail beyond `cutoff`.
pub fn outlier_rank(dates: &[NaiveDate], values: &[Option<f64>], cutoff: f64) -> (Vec<f64>, Vec<f64>) {
    let ranks = pct_rank_by_date(dates, values);
    let ranked: Vec<f64> = ranks.iter().map(|r| r.unwrap_or(MISSING_RANK)).collect();
    let extreme = ranks
        .iter()
        .map(|r| match r {
            Some(x) if *x <= cutoff || *x > 1.0 - cutoff => 1.0,
            _ => 0.0,
        })
        .collect();
    (ranked, extreme)
}

/// Ternary label from a percentile rank: top `thresh` → +1, bottom `thresh`
/// → −1.
pub fn ternary_label(rank: f64, thresh: f64) -> f64 {
    if rank > 1.0 - thresh {
        1.0
    } else if rank <= thresh {
        -1.0
    } else {
        0.0
    }
}

/// Multi-horizon smoothed responses over rows sorted by (SecCode, Date).
///
/// Each horizon's forward return is ranked per date, the ranks are summed and
/// the sum is ranked again before labelling. Rows lacking any horizon's
/// forward price get no response.
pub fn smoothed_responses(
    sec_codes: &[String],
    dates: &[NaiveDate],
    prices: &[Option<f64>],
    horizons: &[usize],
    thresh: f64,
) -> Vec<Option<f64>> {
    let n = prices.len();
    if horizons.is_empty() {
        return vec![None; n];
    }

    let mut summed: Vec<Option<f64>> = vec![Some(0.0); n];
    for &h in horizons {
        let forward: Vec<Option<f64>> = (0..n)
            .map(|i| {
                let j = i + h;
                if h == 0 || j >= n || sec_codes[j] != sec_codes[i] {
                    return None;
                }
                match (prices[i], prices[j]) {
                    (Some(p0), Some(p1)) if p0 != 0.0 => Some(p1 / p0 - 1.0),
                    _ => None,
                }
            })
            .collect();
        let ranks = pct_rank_by_date(dates, &forward);
        for (acc, r) in summed.iter_mut().zip(ranks) {
            *acc = match (*acc, r) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            };
        }
    }

    pct_rank_by_date(dates, &summed)
        .into_iter()
        .map(|r| r.map(|x| ternary_label(x, thresh)))
        .collect()
}
