//! Walk-forward simulation across a hyperparameter grid.
//!
//! Periods of a data version are replayed in order through one
//! [`RollingContainer`]. Within a period, models are fitted once per distinct
//! training window and every grid combination then trades its own
//! [`PortfolioConstructor`], both stages in parallel over the shared,
//! read-only container.

use crate::domain::constructor::{ConstructorParams, PortfolioConstructor};
use crate::domain::container::{DataContainer, PrepParams, RollingContainer};
use crate::domain::error::QuantwalkError;
use crate::domain::metrics::Metrics;
use crate::domain::portfolio::DailyStat;
use crate::domain::settings::SimulationConfig;
use crate::domain::signal::{Signal, SignalGenerator};
use crate::ports::period_store::PeriodStore;
use crate::ports::results_port::ResultsPort;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// `None` trains on every period seen so far.
    pub training_qtrs: Option<usize>,
    pub holding_period: usize,
    pub per_side_count: usize,
}

impl Hyperparameters {
    pub fn label(&self) -> String {
        format!(
            "tq{}_hp{}_ps{}",
            self.training_qtrs.unwrap_or(0),
            self.holding_period,
            self.per_side_count
        )
    }
}

/// Cartesian product of the list-valued settings.
pub fn hyperparameter_grid(config: &SimulationConfig) -> Vec<Hyperparameters> {
    let mut grid = Vec::new();
    for &training_qtrs in &config.training_qtrs {
        for &holding_period in &config.holding_periods {
            for &per_side_count in &config.per_side_counts {
                grid.push(Hyperparameters {
                    training_qtrs,
                    holding_period,
                    per_side_count,
                });
            }
        }
    }
    grid
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboSummary {
    pub label: String,
    pub hyperparameters: Hyperparameters,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutcome {
    pub strategy: String,
    pub version: String,
    pub periods: usize,
    pub summaries: Vec<ComboSummary>,
}

struct ComboRun {
    params: Hyperparameters,
    constructor: PortfolioConstructor,
    stats: Vec<DailyStat>,
}

impl ComboRun {
    fn new(params: Hyperparameters, base: &ConstructorParams) -> Self {
        let ctor = ConstructorParams {
            holding_period: params.holding_period,
            per_side_count: params.per_side_count,
            ..base.clone()
        };
        Self {
            params,
            constructor: PortfolioConstructor::new(ctor),
            stats: Vec::new(),
        }
    }
}

/// Fit a fresh model on the window ending at `time_index` and score the
/// current test rows.
pub fn period_signals(
    container: &dyn DataContainer,
    time_index: usize,
    prep: &PrepParams,
    config: &SimulationConfig,
) -> Result<Vec<Signal>, QuantwalkError> {
    let data = container.prep_data(time_index, prep)?;
    let mut generator = SignalGenerator::new(&config.model, config.class_policy);
    if !generator.fit_model(&data)? {
        return Ok(Vec::new());
    }
    generator.get_signals(&data)
}

pub struct Simulator<'a> {
    store: &'a dyn PeriodStore,
    results: Option<&'a dyn ResultsPort>,
    config: SimulationConfig,
}

impl<'a> Simulator<'a> {
    pub fn new(store: &'a dyn PeriodStore, config: SimulationConfig) -> Self {
        Self {
            store,
            results: None,
            config,
        }
    }

    /// Persist per-period statistics and the final summary.
    pub fn with_results(mut self, results: &'a dyn ResultsPort) -> Self {
        self.results = Some(results);
        self
    }

    pub fn run(&self, strategy: &str, version: &str) -> Result<SimulationOutcome, QuantwalkError> {
        let periods = self.store.list_periods(strategy, version)?;
        let grid = hyperparameter_grid(&self.config);
        info!(strategy, version, periods = periods.len(), combos = grid.len(), "simulation started");

        let mut combos: Vec<ComboRun> = grid
            .iter()
            .map(|p| ComboRun::new(*p, &self.config.constructor))
            .collect();
        let mut windows: Vec<Option<usize>> = Vec::new();
        for q in &self.config.training_qtrs {
            if !windows.contains(q) {
                windows.push(*q);
            }
        }

        let mut container = RollingContainer::new(self.config.retention);
        for (time_index, period) in periods.iter().enumerate() {
            let frame = self.store.read_period(strategy, version, *period)?;
            container.add_data(frame, time_index)?;
            let Some(current) = container.current_frame() else {
                continue;
            };
            if current.test_count() == 0 {
                warn!(%period, "period has no test rows");
            }

            let shared = &container;
            let config = &self.config;
            let signals: HashMap<Option<usize>, Vec<Signal>> = windows
                .par_iter()
                .map(|q| {
                    let prep = PrepParams {
                        training_qtrs: *q,
                        ..config.prep.clone()
                    };
                    period_signals(shared, time_index, &prep, config).map(|s| (*q, s))
                })
                .collect::<Result<_, _>>()?;

            let empty = Vec::new();
            let period_stats: Vec<Vec<DailyStat>> = combos
                .par_iter_mut()
                .map(|combo| {
                    let combo_signals = signals.get(&combo.params.training_qtrs).unwrap_or(&empty);
                    let stats = combo.constructor.run_period(current, combo_signals)?;
                    combo.stats.extend(stats.iter().cloned());
                    Ok(stats)
                })
                .collect::<Result<_, QuantwalkError>>()?;

            if let Some(results) = self.results {
                for (combo, stats) in combos.iter().zip(&period_stats) {
                    results.write_period_stats(strategy, version, &combo.params.label(), *period, stats)?;
                }
            }
            info!(
                %period,
                index = time_index,
                signals = signals.values().map(Vec::len).max().unwrap_or(0),
                "period simulated"
            );
        }

        let summaries: Vec<ComboSummary> = combos
            .iter()
            .map(|c| ComboSummary {
                label: c.params.label(),
                hyperparameters: c.params,
                metrics: Metrics::compute(
                    &c.stats,
                    self.config.constructor.booksize,
                    self.config.risk_free_rate,
                ),
            })
            .collect();
        if let Some(results) = self.results {
            results.write_summary(strategy, version, &summaries)?;
        }

        Ok(SimulationOutcome {
            strategy: strategy.to_string(),
            version: version.to_string(),
            periods: periods.len(),
            summaries,
        })
    }
}
