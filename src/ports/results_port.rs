//! Simulation results sink.

use crate::domain::error::QuantwalkError;
use crate::domain::portfolio::DailyStat;
use crate::domain::simulation::ComboSummary;
use chrono::NaiveDate;

pub trait ResultsPort {
    /// Daily statistics of one hyperparameter combination for one period.
    fn write_period_stats(
        &self,
        strategy: &str,
        version: &str,
        combo: &str,
        period: NaiveDate,
        stats: &[DailyStat],
    ) -> Result<(), QuantwalkError>;

    fn write_summary(
        &self,
        strategy: &str,
        version: &str,
        summaries: &[ComboSummary],
    ) -> Result<(), QuantwalkError>;
}
