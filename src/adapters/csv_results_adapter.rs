//! Simulation results as CSV and JSON files.
//!
//! ```text
//! <root>/<strategy>/<version>/<combo>/<YYYY-MM-DD>.csv   daily statistics
//! <root>/<strategy>/<version>/summary.csv
//! <root>/<strategy>/<version>/summary.json
//! ```

use crate::adapters::csv_period_store::write_atomic;
use crate::domain::error::QuantwalkError;
use crate::domain::portfolio::DailyStat;
use crate::domain::simulation::ComboSummary;
use crate::ports::results_port::ResultsPort;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;

pub struct CsvResultsAdapter {
    root: PathBuf,
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    combo: &'a str,
    training_qtrs: usize,
    holding_period: usize,
    per_side_count: usize,
    trading_days: usize,
    total_pl: f64,
    total_return: f64,
    annualized_return: f64,
    sharpe_ratio: f64,
    sortino_ratio: f64,
    max_drawdown: f64,
    max_drawdown_duration: i64,
    avg_turnover: f64,
    avg_open_positions: f64,
    hit_rate: f64,
    total_cost: f64,
}

impl CsvResultsAdapter {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn run_dir(&self, strategy: &str, version: &str) -> PathBuf {
        self.root.join(strategy).join(version)
    }
}

fn csv_bytes<T: Serialize>(rows: impl IntoIterator<Item = T>) -> Result<Vec<u8>, QuantwalkError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.into_inner().map_err(|e| QuantwalkError::PeriodFile {
        reason: e.to_string(),
    })
}

impl ResultsPort for CsvResultsAdapter {
    fn write_period_stats(
        &self,
        strategy: &str,
        version: &str,
        combo: &str,
        period: NaiveDate,
        stats: &[DailyStat],
    ) -> Result<(), QuantwalkError> {
        let path = self
            .run_dir(strategy, version)
            .join(combo)
            .join(format!("{}.csv", period.format("%Y-%m-%d")));
        write_atomic(&path, &csv_bytes(stats)?)
    }

    fn write_summary(
        &self,
        strategy: &str,
        version: &str,
        summaries: &[ComboSummary],
    ) -> Result<(), QuantwalkError> {
        let dir = self.run_dir(strategy, version);
        let rows = summaries.iter().map(|s| {
            let m = &s.metrics;
            SummaryRow {
                combo: &s.label,
                training_qtrs: s.hyperparameters.training_qtrs.unwrap_or(0),
                holding_period: s.hyperparameters.holding_period,
                per_side_count: s.hyperparameters.per_side_count,
                trading_days: m.trading_days,
                total_pl: m.total_pl,
                total_return: m.total_return,
                annualized_return: m.annualized_return,
                sharpe_ratio: m.sharpe_ratio,
                sortino_ratio: m.sortino_ratio,
                max_drawdown: m.max_drawdown,
                max_drawdown_duration: m.max_drawdown_duration,
                avg_turnover: m.avg_turnover,
                avg_open_positions: m.avg_open_positions,
                hit_rate: m.hit_rate,
                total_cost: m.total_cost,
            }
        });
        write_atomic(&dir.join("summary.csv"), &csv_bytes(rows)?)?;
        let json = serde_json::to_string_pretty(summaries)?;
        write_atomic(&dir.join("summary.json"), json.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::Metrics;
    use crate::domain::simulation::Hyperparameters;
    use std::fs;
    use tempfile::TempDir;

    fn stat(day: u32, pl: f64) -> DailyStat {
        DailyStat {
            date: NaiveDate::from_ymd_opt(2023, 4, day).unwrap(),
            pl,
            ret: pl / 1000.0,
            turnover: 0.5,
            long_exposure: 0.5,
            short_exposure: -0.5,
            open_positions: 2,
            cost: 0.0,
        }
    }

    #[test]
    fn period_stats_use_column_names() {
        let dir = TempDir::new().unwrap();
        let adapter = CsvResultsAdapter::new(dir.path().to_path_buf());
        let period = NaiveDate::from_ymd_opt(2023, 4, 1).unwrap();
        adapter
            .write_period_stats("s", "version_001", "tq0_hp5_ps10", period, &[stat(3, 10.0), stat(4, -2.0)])
            .unwrap();
        let text = fs::read_to_string(
            dir.path().join("s/version_001/tq0_hp5_ps10/2023-04-01.csv"),
        )
        .unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Date,PL,Return,Turnover,LongExposure,ShortExposure,OpenPositions,Cost"
        );
        assert!(lines.next().unwrap().starts_with("2023-04-03,10.0,"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn summary_written_as_csv_and_json() {
        let dir = TempDir::new().unwrap();
        let adapter = CsvResultsAdapter::new(dir.path().to_path_buf());
        let hp = Hyperparameters {
            training_qtrs: Some(4),
            holding_period: 5,
            per_side_count: 10,
        };
        let summary = ComboSummary {
            label: hp.label(),
            hyperparameters: hp,
            metrics: Metrics::compute(&[stat(3, 10.0)], 1000.0, 0.0),
        };
        adapter.write_summary("s", "version_001", &[summary.clone()]).unwrap();

        let csv_text = fs::read_to_string(dir.path().join("s/version_001/summary.csv")).unwrap();
        assert!(csv_text.starts_with("combo,training_qtrs,holding_period"));
        assert!(csv_text.contains("tq4_hp5_ps10,4,5,10,1,"));

        let json = fs::read_to_string(dir.path().join("s/version_001/summary.json")).unwrap();
        let back: Vec<ComboSummary> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[0].label, summary.label);
        assert_eq!(back[0].hyperparameters, hp);
    }
}
