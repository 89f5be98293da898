//! Walk-forward data construction.
//!
//! Drives the universe resolver and feature compiler period by period and
//! writes one file per period into a data version. A run is either a new
//! version or a rerun that regenerates only incomplete trailing periods.

use crate::domain::calendar::{latest_trading_date, trading_dates_between};
use crate::domain::date_iterator::{
    full_history_window, period_windows, DateParameters, PeriodWindow,
};
use crate::domain::error::QuantwalkError;
use crate::domain::feature::{parse_feature_list, FeatureDescriptor};
use crate::domain::feature_sql::{FeatureCompiler, SqlDialect, INDEX_TABLE, PRICE_TABLE};
use crate::domain::period::{PeriodFrame, PeriodRow};
use crate::domain::universe::resolve_universe;
use crate::domain::version::{git_info, ConstructorType, FilterArguments, VersionMetadata};
use crate::ports::period_store::PeriodStore;
use crate::ports::query_port::{QueryPort, QueryResult};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Uninitialized,
    NewRun,
    Rerun,
    Running,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructionRequest {
    pub strategy: String,
    pub description: String,
    pub constructor_type: ConstructorType,
    pub features: Vec<String>,
    pub date_parameters: Option<DateParameters>,
    pub filter_arguments: FilterArguments,
}

impl ConstructionRequest {
    pub fn from_metadata(meta: &VersionMetadata) -> Self {
        Self {
            strategy: meta.strategy_name.clone(),
            description: meta.description.clone(),
            constructor_type: meta.constructor_type,
            features: meta.features.clone(),
            date_parameters: meta.date_parameters.clone(),
            filter_arguments: meta.filter_arguments.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub strategy: String,
    pub version: String,
    pub written: Vec<NaiveDate>,
    pub skipped: Vec<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}

/// Build a sorted, duplicate-free period frame from a compiled feature query.
/// Rows dated after `filter_date` are test rows.
pub fn frame_from_result(
    result: &QueryResult,
    filter_date: NaiveDate,
) -> Result<PeriodFrame, QuantwalkError> {
    let sec_idx = result.require_column("SecCode")?;
    let date_idx = result.require_column("Date")?;
    let value_idx: Vec<usize> = (0..result.columns.len())
        .filter(|&i| i != sec_idx && i != date_idx)
        .collect();

    let mut frame = PeriodFrame::new(value_idx.iter().map(|&i| result.columns[i].clone()).collect());
    for row in &result.rows {
        let sec_code = row
            .get(sec_idx)
            .and_then(|v| v.as_string())
            .ok_or_else(|| QuantwalkError::DatabaseQuery {
                reason: "row without SecCode".into(),
            })?;
        let date = row
            .get(date_idx)
            .and_then(|v| v.as_date())
            .ok_or_else(|| QuantwalkError::DatabaseQuery {
                reason: format!("row for SecCode {} without a valid Date", sec_code),
            })?;
        frame.push(PeriodRow {
            sec_code,
            date,
            test_flag: date > filter_date,
            values: value_idx
                .iter()
                .map(|&i| row.get(i).and_then(|v| v.as_f64()))
                .collect(),
        });
    }
    frame.sort();
    frame.ensure_unique()?;
    Ok(frame)
}

pub struct DataConstructor<'a> {
    query: &'a dyn QueryPort,
    store: &'a dyn PeriodStore,
    dialect: SqlDialect,
    now: NaiveDate,
    state: RunState,
}

impl<'a> DataConstructor<'a> {
    pub fn new(
        query: &'a dyn QueryPort,
        store: &'a dyn PeriodStore,
        dialect: SqlDialect,
        now: NaiveDate,
    ) -> Self {
        Self {
            query,
            store,
            dialect,
            now,
            state: RunState::Uninitialized,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn begin(&mut self, next: RunState) -> Result<(), QuantwalkError> {
        if self.state != RunState::Uninitialized {
            return Err(QuantwalkError::InvalidState {
                reason: format!("constructor already used (state {:?})", self.state),
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn new_run(&mut self, request: &ConstructionRequest) -> Result<RunSummary, QuantwalkError> {
        self.begin(RunState::NewRun)?;
        let descriptors = parse_feature_list(&request.features)?;
        let windows = self.windows(request)?;
        let version = self.store.create_version(&request.strategy)?;
        info!(strategy = %request.strategy, %version, periods = windows.len(), "starting new data version");

        self.state = RunState::Running;
        let summary = self.run_windows(request, &descriptors, &version, &windows)?;
        self.write_metadata(request, &summary, None)?;
        self.state = RunState::Complete;
        Ok(summary)
    }

    pub fn rerun(&mut self, strategy: &str, version: &str) -> Result<RunSummary, QuantwalkError> {
        self.begin(RunState::Rerun)?;
        let versions = self.store.list_versions(strategy)?;
        if !versions.iter().any(|v| v == version) {
            return Err(QuantwalkError::VersionNotFound {
                strategy: strategy.into(),
                version: version.into(),
            });
        }
        let previous = self.store.read_metadata(strategy, version)?;
        let request = ConstructionRequest::from_metadata(&previous);
        let descriptors = parse_feature_list(&request.features)?;
        let windows = self.windows(&request)?;

        let existing = self.store.list_periods(strategy, version)?;
        let incomplete = self.incomplete_periods(strategy, version, &existing, &windows)?;
        let complete: BTreeSet<NaiveDate> = existing
            .iter()
            .copied()
            .filter(|p| !incomplete.contains(p))
            .collect();
        let pending: Vec<PeriodWindow> = windows
            .into_iter()
            .filter(|w| !complete.contains(&w.test_start))
            .collect();
        info!(
            %strategy,
            %version,
            complete = complete.len(),
            pending = pending.len(),
            "resuming data version"
        );

        self.state = RunState::Running;
        let mut summary = self.run_windows(&request, &descriptors, version, &pending)?;
        for skipped in &summary.skipped {
            if existing.contains(skipped) {
                self.store.remove_period(strategy, version, *skipped)?;
            }
        }
        let previous_max = previous
            .max_date
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
        summary.max_date = summary.max_date.max(previous_max);
        self.write_metadata(&request, &summary, Some(&previous))?;
        self.state = RunState::Complete;
        Ok(summary)
    }

    fn windows(&self, request: &ConstructionRequest) -> Result<Vec<PeriodWindow>, QuantwalkError> {
        let params = request
            .date_parameters
            .as_ref()
            .ok_or_else(|| QuantwalkError::ConfigMissing {
                section: "construction".into(),
                key: "start_year".into(),
            })?;
        Ok(match request.constructor_type {
            ConstructorType::Universe => period_windows(params, self.now),
            ConstructorType::Ids | ConstructorType::Indexes => {
                full_history_window(params.start_year, self.now).into_iter().collect()
            }
        })
    }

    fn sec_codes_for(
        &self,
        request: &ConstructionRequest,
        window: &PeriodWindow,
    ) -> Result<Vec<String>, QuantwalkError> {
        let codes = match request.constructor_type {
            ConstructorType::Universe => {
                let args = request.filter_arguments.universe.clone().unwrap_or_default();
                resolve_universe(self.query, &args, window.filter_date())?.sec_codes
            }
            ConstructorType::Ids | ConstructorType::Indexes => request.filter_arguments.ids.clone(),
        };
        if codes.is_empty() {
            return Err(QuantwalkError::EmptyUniverse {
                filter_date: window.filter_date(),
            });
        }
        Ok(codes)
    }

    /// Pull one period. `None` when the period has no test rows.
    pub fn build_period(
        &self,
        request: &ConstructionRequest,
        descriptors: &[FeatureDescriptor],
        window: &PeriodWindow,
    ) -> Result<Option<PeriodFrame>, QuantwalkError> {
        let sec_codes = self.sec_codes_for(request, window)?;
        let table = match request.constructor_type {
            ConstructorType::Indexes => INDEX_TABLE,
            _ => PRICE_TABLE,
        };
        let sql = FeatureCompiler::new(self.dialect).with_table(table).compile(
            descriptors,
            &sec_codes,
            window.train_start,
            window.test_end,
            false,
        );
        debug!(%sql, "compiled feature query");

        let result = self.query.execute(&sql)?;
        let frame = frame_from_result(&result, window.filter_date())?;
        if frame.test_count() == 0 {
            warn!(test_start = %window.test_start, rows = frame.len(), "period has no test rows; skipping");
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn run_windows(
        &self,
        request: &ConstructionRequest,
        descriptors: &[FeatureDescriptor],
        version: &str,
        windows: &[PeriodWindow],
    ) -> Result<RunSummary, QuantwalkError> {
        let mut summary = RunSummary {
            strategy: request.strategy.clone(),
            version: version.to_string(),
            ..RunSummary::default()
        };
        for window in windows {
            match self.build_period(request, descriptors, window)? {
                Some(frame) => {
                    self.store
                        .write_period(&request.strategy, version, window.test_start, &frame)?;
                    info!(
                        test_start = %window.test_start,
                        rows = frame.len(),
                        test_rows = frame.test_count(),
                        "wrote period"
                    );
                    summary.max_date = summary.max_date.max(frame.max_date());
                    summary.written.push(window.test_start);
                }
                None => summary.skipped.push(window.test_start),
            }
        }
        Ok(summary)
    }

    /// Scan existing periods from the most recent backwards; stop at the first
    /// complete one.
    fn incomplete_periods(
        &self,
        strategy: &str,
        version: &str,
        existing: &[NaiveDate],
        windows: &[PeriodWindow],
    ) -> Result<Vec<NaiveDate>, QuantwalkError> {
        let latest = match latest_trading_date(self.query)? {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };
        let mut incomplete = Vec::new();
        for period in existing.iter().rev() {
            let Some(window) = windows.iter().find(|w| w.test_start == *period) else {
                continue;
            };
            let expected = trading_dates_between(self.query, window.test_start, window.test_end.min(latest))?;
            let present = self.store.read_period(strategy, version, *period)?.test_dates();
            let missing = expected.iter().filter(|d| !present.contains(d)).count();
            if missing == 0 {
                break;
            }
            info!(period = %period, missing, "period incomplete; will regenerate");
            incomplete.push(*period);
        }
        Ok(incomplete)
    }

    fn write_metadata(
        &self,
        request: &ConstructionRequest,
        summary: &RunSummary,
        previous: Option<&VersionMetadata>,
    ) -> Result<(), QuantwalkError> {
        let (git_branch, git_commit) = git_info();
        let metadata = VersionMetadata {
            features: request.features.clone(),
            constructor_type: request.constructor_type,
            start_time: previous.map_or_else(
                || chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
                |p| p.start_time.clone(),
            ),
            strategy_name: request.strategy.clone(),
            version: summary.version.clone(),
            git_branch,
            git_commit,
            description: request.description.clone(),
            date_parameters: request.date_parameters.clone(),
            filter_arguments: request.filter_arguments.clone(),
            max_date: summary.max_date.map(|d| d.format("%Y-%m-%d").to_string()),
            newly_created_files: summary
                .written
                .iter()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .collect(),
        };
        self.store
            .write_metadata(&request.strategy, &summary.version, &metadata)
    }
}
