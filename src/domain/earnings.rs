//! Earnings-relative features over rows sorted by (SecCode, Date).

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarningsParams {
    /// Trading-day offsets relative to the announcement, inclusive.
    pub offsets: (i64, i64),
    pub anchor_window: usize,
    pub fallback_lookback: usize,
}

impl Default for EarningsParams {
    fn default() -> Self {
        Self {
            offsets: (-1, 2),
            anchor_window: 63,
            fallback_lookback: 21,
        }
    }
}

/// Contiguous row ranges sharing a SecCode.
pub fn security_runs(sec_codes: &[String]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=sec_codes.len() {
        if i == sec_codes.len() || sec_codes[i] != sec_codes[start] {
            if i > start {
                runs.push(start..i);
            }
            start = i;
        }
    }
    runs
}

fn is_flagged(flag: Option<f64>) -> bool {
    flag.is_some_and(|f| f != 0.0)
}

/// 1.0 for rows within `[offset1, offset2]` rows of a flagged announcement in
/// the same security, clamped to that security's rows.
pub fn earnings_blackout(sec_codes: &[String], flags: &[Option<f64>], offsets: (i64, i64)) -> Vec<f64> {
    let (lo, hi) = if offsets.0 <= offsets.1 {
        offsets
    } else {
        (offsets.1, offsets.0)
    };
    let mut out = vec![0.0; flags.len()];
    for run in security_runs(sec_codes) {
        let first = run.start as i64;
        let last = run.end as i64 - 1;
        for j in run.clone() {
            if !is_flagged(flags[j]) {
                continue;
            }
            let from = (j as i64 + lo).max(first);
            let to = (j as i64 + hi).min(last);
            for k in from..=to {
                out[k as usize] = 1.0;
            }
        }
    }
    out
}

/// Move from the most recent post-earnings anchor close, looking back at most
/// `anchor_window` rows; without a qualifying announcement the close
/// `fallback_lookback` rows earlier is used.
pub fn anchor_returns(
    sec_codes: &[String],
    closes: &[Option<f64>],
    flags: &[Option<f64>],
    params: &EarningsParams,
) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    for run in security_runs(sec_codes) {
        for i in run.clone() {
            let earliest = i.saturating_sub(params.anchor_window).max(run.start);
            // The anchor is the first close after the announcement.
            let anchor = (earliest..i)
                .rev()
                .find(|&j| is_flagged(flags[j]))
                .map(|j| j + 1)
                .filter(|&a| a <= i);
            let base = match anchor {
                Some(a) => Some(a),
                None => i.checked_sub(params.fallback_lookback).filter(|&b| b >= run.start),
            };
            out[i] = match (base.and_then(|b| closes[b]), closes[i]) {
                (Some(p0), Some(p1)) if p0 != 0.0 => Some(p1 / p0 - 1.0),
                _ => None,
            };
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(runs: &[(&str, usize)]) -> Vec<String> {
        runs.iter()
            .flat_map(|(s, n)| std::iter::repeat(s.to_string()).take(*n))
            .collect()
    }

    #[test]
    fn runs_split_on_security() {
        let s = secs(&[("1", 2), ("2", 3)]);
        assert_eq!(security_runs(&s), vec![0..2, 2..5]);
        assert!(security_runs(&[]).is_empty());
    }

    #[test]
    fn blackout_window_is_inclusive_and_clamped() {
        let s = secs(&[("1", 5), ("2", 3)]);
        let mut flags = vec![None; 8];
        flags[1] = Some(1.0);
        flags[7] = Some(1.0);
        let b = earnings_blackout(&s, &flags, (-1, 2));
        assert_eq!(b, vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn anchor_return_uses_post_announcement_close() {
        let s = secs(&[("1", 5)]);
        let closes = vec![Some(10.0), Some(11.0), Some(12.0), Some(15.0), Some(18.0)];
        let mut flags = vec![None; 5];
        flags[1] = Some(1.0);
        let params = EarningsParams {
            offsets: (0, 0),
            anchor_window: 10,
            fallback_lookback: 1,
        };
        let r = anchor_returns(&s, &closes, &flags, &params);
        // Anchor at row 2 (close 12).
        assert_eq!(r[4], Some(18.0 / 12.0 - 1.0));
        assert_eq!(r[3], Some(15.0 / 12.0 - 1.0));
        assert_eq!(r[2], Some(0.0));
        // Before the announcement: fallback one row back.
        assert_eq!(r[1], Some(11.0 / 10.0 - 1.0));
        assert_eq!(r[0], None);
    }

    #[test]
    fn anchor_falls_back_outside_window() {
        let s = secs(&[("1", 6)]);
        let closes: Vec<Option<f64>> = (0..6).map(|i| Some(10.0 + i as f64)).collect();
        let mut flags = vec![None; 6];
        flags[0] = Some(1.0);
        let params = EarningsParams {
            offsets: (0, 0),
            anchor_window: 2,
            fallback_lookback: 3,
        };
        let r = anchor_returns(&s, &closes, &flags, &params);
        assert_eq!(r[5], Some(15.0 / 12.0 - 1.0));
    }
}
