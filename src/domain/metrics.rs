//! Performance metrics over a daily statistics series.

use super::portfolio::DailyStat;
use serde::{Deserialize, Serialize};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub trading_days: usize,
    pub total_pl: f64,
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration: i64,
    pub avg_turnover: f64,
    pub avg_open_positions: f64,
    pub hit_rate: f64,
    pub total_cost: f64,
}

impl Metrics {
    /// The book is held at constant size, so returns add rather than compound.
    pub fn compute(stats: &[DailyStat], booksize: f64, risk_free_rate: f64) -> Self {
        let n = stats.len();
        let total_pl: f64 = stats.iter().map(|s| s.pl).sum();
        let total_return = if booksize > 0.0 { total_pl / booksize } else { 0.0 };

        let annualized_return = if n > 0 {
            total_return * TRADING_DAYS_PER_YEAR / n as f64
        } else {
            0.0
        };

        let mut equity = Vec::with_capacity(n);
        let mut running = booksize;
        for s in stats {
            running += s.pl;
            equity.push(running);
        }
        let (max_drawdown, max_drawdown_duration) = compute_drawdown(booksize, &equity);

        let returns: Vec<f64> = stats.iter().map(|s| s.ret).collect();
        let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
        let (sharpe_ratio, sortino_ratio) = compute_risk_adjusted(&returns, daily_rf);

        let mean = |f: &dyn Fn(&DailyStat) -> f64| {
            if n > 0 {
                stats.iter().map(f).sum::<f64>() / n as f64
            } else {
                0.0
            }
        };
        let avg_turnover = mean(&|s| s.turnover);
        let avg_open_positions = mean(&|s| s.open_positions as f64);

        let active: Vec<&DailyStat> = stats.iter().filter(|s| s.pl != 0.0).collect();
        let hit_rate = if active.is_empty() {
            0.0
        } else {
            active.iter().filter(|s| s.pl > 0.0).count() as f64 / active.len() as f64
        };

        Metrics {
            trading_days: n,
            total_pl,
            total_return,
            annualized_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            avg_turnover,
            avg_open_positions,
            hit_rate,
            total_cost: stats.iter().map(|s| s.cost).sum(),
        }
    }
}

fn compute_drawdown(start: f64, equity: &[f64]) -> (f64, i64) {
    let mut peak = start;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0i64;
    let mut current_dd_duration = 0i64;

    for &value in equity {
        if value >= peak {
            peak = value;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            let dd = (peak - value) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
            current_dd_duration += 1;
            if current_dd_duration > max_dd_duration {
                max_dd_duration = current_dd_duration;
            }
        }
    }

    (max_dd, max_dd_duration)
}

fn compute_risk_adjusted(returns: &[f64], daily_rf: f64) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;

    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let excess_return = mean - daily_rf;

    let sharpe = if stddev > 0.0 {
        (excess_return / stddev) * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    let downside: f64 = returns
        .iter()
        .filter(|&&r| r < daily_rf)
        .map(|&r| (r - daily_rf).powi(2))
        .sum();
    let downside_stddev = (downside / n).sqrt();

    let sortino = if downside_stddev > 0.0 {
        (excess_return / downside_stddev) * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    (sharpe, sortino)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn stats(pls: &[f64], booksize: f64) -> Vec<DailyStat> {
        pls.iter()
            .enumerate()
            .map(|(i, &pl)| DailyStat {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                pl,
                ret: pl / booksize,
                turnover: 0.1 * (i + 1) as f64,
                long_exposure: 0.0,
                short_exposure: 0.0,
                open_positions: 4,
                cost: 1.0,
            })
            .collect()
    }

    #[test]
    fn empty_series() {
        let m = Metrics::compute(&[], 1000.0, 0.0);
        assert_eq!(m.trading_days, 0);
        assert_eq!(m.total_return, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.hit_rate, 0.0);
    }

    #[test]
    fn totals_and_averages() {
        let m = Metrics::compute(&stats(&[10.0, -5.0, 0.0, 15.0], 1000.0), 1000.0, 0.0);
        assert_relative_eq!(m.total_pl, 20.0);
        assert_relative_eq!(m.total_return, 0.02);
        assert_relative_eq!(m.annualized_return, 0.02 * 252.0 / 4.0);
        assert_relative_eq!(m.avg_turnover, 0.25);
        assert_relative_eq!(m.avg_open_positions, 4.0);
        assert_relative_eq!(m.hit_rate, 2.0 / 3.0);
        assert_relative_eq!(m.total_cost, 4.0);
    }

    #[test]
    fn drawdown_from_running_pl() {
        let m = Metrics::compute(&stats(&[100.0, -110.0, -40.0, 200.0], 1000.0), 1000.0, 0.0);
        assert_relative_eq!(m.max_drawdown, 150.0 / 1100.0, epsilon = 1e-12);
        assert_eq!(m.max_drawdown_duration, 2);
    }

    #[test]
    fn sharpe_positive_for_mostly_gains() {
        let m = Metrics::compute(&stats(&[5.0, 6.0, -1.0, 4.0, 7.0], 1000.0), 1000.0, 0.0);
        assert!(m.sharpe_ratio > 0.0);
        assert!(m.sortino_ratio > m.sharpe_ratio);
    }

    #[test]
    fn constant_returns_have_no_sharpe() {
        let m = Metrics::compute(&stats(&[2.0, 2.0, 2.0], 1024.0), 1024.0, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.sortino_ratio, 0.0);
    }
}
