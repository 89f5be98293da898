//! Typed, validated configuration records built from a [`ConfigPort`].
//!
//! Every record is read once at startup and passed down explicitly.

use crate::domain::constructor::{ConstructorParams, ScoreDirection};
use crate::domain::container::PrepParams;
use crate::domain::data_constructor::ConstructionRequest;
use crate::domain::date_iterator::{DateParameters, Frequency};
use crate::domain::earnings::EarningsParams;
use crate::domain::error::QuantwalkError;
use crate::domain::feature::parse_feature_list;
use crate::domain::feature_sql::SqlDialect;
use crate::domain::model::ModelSpec;
use crate::domain::signal::ClassAsymmetryPolicy;
use crate::domain::universe::UniverseArgs;
use crate::domain::version::{ConstructorType, FilterArguments};
use crate::ports::config_port::ConfigPort;
use chrono::NaiveTime;
use std::path::PathBuf;
use std::str::FromStr;

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> QuantwalkError {
    QuantwalkError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn required(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, QuantwalkError> {
    config
        .get_string(section, key)
        .ok_or_else(|| QuantwalkError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        })
}

fn parse_value<T: FromStr>(section: &str, key: &str, raw: &str) -> Result<T, QuantwalkError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| invalid(section, key, format!("cannot parse '{}'", raw)))
}

fn optional<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, QuantwalkError> {
    config
        .get_string(section, key)
        .map(|raw| parse_value(section, key, &raw))
        .transpose()
}

fn or_default<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, QuantwalkError> {
    Ok(optional(config, section, key)?.unwrap_or(default))
}

fn list<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<Vec<T>>, QuantwalkError> {
    match config.get_list(section, key) {
        None => Ok(None),
        Some(items) if items.is_empty() => Ok(None),
        Some(items) => items
            .iter()
            .map(|raw| parse_value(section, key, raw))
            .collect::<Result<Vec<T>, _>>()
            .map(Some),
    }
}

fn positive(section: &str, key: &str, value: f64) -> Result<f64, QuantwalkError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(invalid(section, key, "must be positive"))
    }
}

fn time_of_day(section: &str, key: &str, raw: &str) -> Result<NaiveTime, QuantwalkError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| invalid(section, key, format!("expected HH:MM, got '{}'", raw)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub path: Option<String>,
    pub pool_size: u32,
    pub conninfo: Option<String>,
    pub dialect: SqlDialect,
    pub query_timeout_secs: u64,
    /// `None` disables the maintenance-window guard.
    pub blackout: Option<(NaiveTime, NaiveTime)>,
    pub max_retries: u32,
}

impl DatabaseConfig {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantwalkError> {
        const S: &str = "database";
        let backend = match config.get_string(S, "backend").as_deref().map(str::trim) {
            None | Some("sqlite") => DatabaseBackend::Sqlite,
            Some("postgres") | Some("postgresql") => DatabaseBackend::Postgres,
            Some(other) => return Err(invalid(S, "backend", format!("unknown backend '{}'", other))),
        };
        let dialect = match config.get_string(S, "dialect") {
            Some(name) => SqlDialect::from_name(&name)
                .ok_or_else(|| invalid(S, "dialect", format!("unknown dialect '{}'", name)))?,
            None => match backend {
                DatabaseBackend::Sqlite => SqlDialect::Sqlite,
                DatabaseBackend::Postgres => SqlDialect::Postgres,
            },
        };

        let blackout = match (
            config.get_string(S, "blackout_start"),
            config.get_string(S, "blackout_end"),
        ) {
            (Some(s), _) | (_, Some(s)) if s.trim().eq_ignore_ascii_case("none") => None,
            (start, end) => Some((
                time_of_day(S, "blackout_start", start.as_deref().unwrap_or("05:00"))?,
                time_of_day(S, "blackout_end", end.as_deref().unwrap_or("06:30"))?,
            )),
        };

        let cfg = Self {
            backend,
            path: config.get_string(S, "path"),
            pool_size: or_default(config, S, "pool_size", 4)?,
            conninfo: config.get_string(S, "conninfo"),
            dialect,
            query_timeout_secs: or_default(config, S, "query_timeout_secs", 1800)?,
            blackout,
            max_retries: or_default(config, S, "max_retries", 3)?,
        };
        if cfg.pool_size == 0 {
            return Err(invalid(S, "pool_size", "must be at least 1"));
        }
        if cfg.backend == DatabaseBackend::Postgres && cfg.conninfo.is_none() {
            return Err(QuantwalkError::ConfigMissing {
                section: S.into(),
                key: "conninfo".into(),
            });
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformConfig {
    pub data_root: PathBuf,
    pub results_root: PathBuf,
    pub database: DatabaseConfig,
}

impl PlatformConfig {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantwalkError> {
        let data_root = PathBuf::from(required(config, "paths", "data_root")?);
        let results_root = config
            .get_string("paths", "results_root")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_root.join("results"));
        Ok(Self {
            data_root,
            results_root,
            database: DatabaseConfig::from_config(config)?,
        })
    }
}

/// `[construction]` as a new-run request.
pub fn construction_request(config: &dyn ConfigPort) -> Result<ConstructionRequest, QuantwalkError> {
    const S: &str = "construction";
    let strategy = required(config, S, "strategy")?;
    let features = config.get_list(S, "features").unwrap_or_default();
    if features.is_empty() {
        return Err(QuantwalkError::ConfigMissing {
            section: S.into(),
            key: "features".into(),
        });
    }
    parse_feature_list(&features)?;

    let type_name = config
        .get_string(S, "constructor_type")
        .unwrap_or_else(|| "universe".into());
    let constructor_type = ConstructorType::from_name(&type_name)
        .ok_or_else(|| invalid(S, "constructor_type", format!("unknown type '{}'", type_name)))?;

    let start_year: i32 = or_default(config, S, "start_year", 2005)?;
    let date_parameters = match constructor_type {
        ConstructorType::Universe => {
            let freq_name = config
                .get_string(S, "frequency")
                .unwrap_or_else(|| "quarterly".into());
            let frequency = Frequency::from_name(&freq_name)
                .ok_or_else(|| invalid(S, "frequency", format!("unknown frequency '{}'", freq_name)))?;
            let params = DateParameters {
                frequency,
                month_offset: or_default(config, S, "month_offset", 0)?,
                train_periods: or_default(config, S, "train_periods", 4)?,
                test_periods: or_default(config, S, "test_periods", 1)?,
                start_year,
            };
            if params.train_periods == 0 || params.test_periods == 0 {
                return Err(invalid(S, "train_periods", "train and test periods must be at least 1"));
            }
            Some(params)
        }
        ConstructorType::Ids | ConstructorType::Indexes => Some(DateParameters {
            frequency: Frequency::Quarterly,
            month_offset: 0,
            train_periods: 1,
            test_periods: 1,
            start_year,
        }),
    };

    let filter_arguments = match constructor_type {
        ConstructorType::Universe => {
            let defaults = UniverseArgs::default();
            let size: usize = or_default(config, S, "universe_size", defaults.size)?;
            if size == 0 {
                return Err(invalid(S, "universe_size", "must be at least 1"));
            }
            FilterArguments {
                universe: Some(UniverseArgs {
                    filter_where: config.get_string(S, "filter_where").unwrap_or(defaults.filter_where),
                    rank_column: config.get_string(S, "rank_column").unwrap_or(defaults.rank_column),
                    size,
                }),
                ids: Vec::new(),
            }
        }
        ConstructorType::Ids | ConstructorType::Indexes => {
            let ids = config.get_list(S, "ids").unwrap_or_default();
            if ids.is_empty() {
                return Err(QuantwalkError::ConfigMissing {
                    section: S.into(),
                    key: "ids".into(),
                });
            }
            FilterArguments { universe: None, ids }
        }
    };

    Ok(ConstructionRequest {
        strategy,
        description: config.get_string(S, "description").unwrap_or_default(),
        constructor_type,
        features,
        date_parameters,
        filter_arguments,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Shared preparation settings; `training_qtrs` is taken from the grid.
    pub prep: PrepParams,
    pub training_qtrs: Vec<Option<usize>>,
    pub model: ModelSpec,
    pub class_policy: ClassAsymmetryPolicy,
    /// Shared construction settings; grid fields are overridden per combo.
    pub constructor: ConstructorParams,
    pub holding_periods: Vec<usize>,
    pub per_side_counts: Vec<usize>,
    /// Trailing periods the container keeps; `None` when any combo trains unbounded.
    pub retention: Option<usize>,
    pub risk_free_rate: f64,
}

impl SimulationConfig {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantwalkError> {
        const S: &str = "simulation";
        let prep_defaults = PrepParams::default();
        let ctor_defaults = ConstructorParams::default();

        let training_qtrs: Vec<Option<usize>> = list::<usize>(config, S, "training_qtrs")?
            .unwrap_or_else(|| vec![0])
            .into_iter()
            .map(|q| if q == 0 { None } else { Some(q) })
            .collect();

        let response_days = list::<usize>(config, S, "response_days")?
            .unwrap_or(prep_defaults.response_days.clone());
        if response_days.is_empty() || response_days.contains(&0) {
            return Err(invalid(S, "response_days", "horizons must be positive"));
        }
        let response_thresh: f64 = or_default(config, S, "response_thresh", prep_defaults.response_thresh)?;
        if !(0.0..=0.5).contains(&response_thresh) {
            return Err(invalid(S, "response_thresh", "must be within [0, 0.5]"));
        }
        let extreme_cutoff: f64 = or_default(config, S, "extreme_cutoff", prep_defaults.extreme_cutoff)?;
        if !(0.0..0.5).contains(&extreme_cutoff) {
            return Err(invalid(S, "extreme_cutoff", "must be within [0, 0.5)"));
        }

        let earnings = if config.get_bool(S, "earnings", false) {
            let defaults = EarningsParams::default();
            let offsets = match list::<i64>(config, S, "earnings_offsets")? {
                Some(v) if v.len() == 2 && v[0] <= v[1] => (v[0], v[1]),
                Some(_) => {
                    return Err(invalid(S, "earnings_offsets", "expected 'before, after' with before <= after"));
                }
                None => defaults.offsets,
            };
            Some(EarningsParams {
                offsets,
                anchor_window: or_default(config, S, "anchor_window", defaults.anchor_window)?,
                fallback_lookback: or_default(config, S, "fallback_lookback", defaults.fallback_lookback)?,
            })
        } else {
            None
        };

        let prep = PrepParams {
            training_qtrs: None,
            features: config.get_list(S, "model_features").unwrap_or_default(),
            response_column: config
                .get_string(S, "response_column")
                .unwrap_or(prep_defaults.response_column),
            response_days,
            response_thresh,
            extreme_cutoff,
            earnings,
        };

        let model = match config.get_string(S, "model").as_deref().map(str::trim) {
            None | Some("logistic") => {
                let (lr, it, l2) = match ModelSpec::default() {
                    ModelSpec::Logistic {
                        learning_rate,
                        iterations,
                        l2,
                    } => (learning_rate, iterations, l2),
                    ModelSpec::Ridge { l2 } => (0.5, 300, l2),
                };
                ModelSpec::Logistic {
                    learning_rate: positive(S, "learning_rate", or_default(config, S, "learning_rate", lr)?)?,
                    iterations: or_default(config, S, "iterations", it)?,
                    l2: or_default(config, S, "l2", l2)?,
                }
            }
            Some("ridge") => ModelSpec::Ridge {
                l2: or_default(config, S, "l2", 1.0)?,
            },
            Some(other) => return Err(invalid(S, "model", format!("unknown model '{}'", other))),
        };

        let class_policy = match config.get_string(S, "class_policy") {
            Some(name) => ClassAsymmetryPolicy::from_name(&name)
                .ok_or_else(|| invalid(S, "class_policy", format!("unknown policy '{}'", name)))?,
            None => ClassAsymmetryPolicy::default(),
        };

        let score_direction = match config.get_string(S, "score_direction") {
            Some(name) => ScoreDirection::from_name(&name)
                .ok_or_else(|| invalid(S, "score_direction", format!("unknown direction '{}'", name)))?,
            None => ScoreDirection::default(),
        };

        let holding_periods =
            list::<usize>(config, S, "holding_period")?.unwrap_or(vec![ctor_defaults.holding_period]);
        let per_side_counts =
            list::<usize>(config, S, "per_side_count")?.unwrap_or(vec![ctor_defaults.per_side_count]);
        if holding_periods.contains(&0) {
            return Err(invalid(S, "holding_period", "must be at least 1"));
        }
        if per_side_counts.contains(&0) {
            return Err(invalid(S, "per_side_count", "must be at least 1"));
        }

        let cost_bps: f64 = or_default(config, S, "cost_bps", ctor_defaults.cost_bps)?;
        if cost_bps < 0.0 {
            return Err(invalid(S, "cost_bps", "must be non-negative"));
        }

        let constructor = ConstructorParams {
            booksize: positive(S, "booksize", or_default(config, S, "booksize", ctor_defaults.booksize)?)?,
            per_side_count: per_side_counts[0],
            holding_period: holding_periods[0],
            score_column: config.get_string(S, "score_column"),
            score_direction,
            close_column: config.get_string(S, "close_column").unwrap_or(ctor_defaults.close_column),
            exec_column: config.get_string(S, "exec_column").unwrap_or(ctor_defaults.exec_column),
            dividend_column: config
                .get_string(S, "dividend_column")
                .unwrap_or(ctor_defaults.dividend_column),
            split_column: config.get_string(S, "split_column").unwrap_or(ctor_defaults.split_column),
            cost_bps,
        };

        let retention: usize = or_default(config, S, "retention_periods", 40)?;
        let retention = if training_qtrs.contains(&None) {
            None
        } else {
            let longest = training_qtrs.iter().flatten().copied().max().unwrap_or(0);
            Some(retention.max(longest).max(1))
        };

        Ok(Self {
            prep,
            training_qtrs,
            model,
            class_policy,
            constructor,
            holding_periods,
            per_side_counts,
            retention,
            risk_free_rate: or_default(config, S, "risk_free_rate", 0.0)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub prices_path: PathBuf,
    pub scaling_path: PathBuf,
    pub size_state_path: PathBuf,
    pub positions_path: Option<PathBuf>,
    /// Calendar days of stored history pulled before the live date.
    pub history_days: i64,
}

impl LiveConfig {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantwalkError> {
        const S: &str = "live";
        Ok(Self {
            prices_path: PathBuf::from(required(config, S, "prices_path")?),
            scaling_path: PathBuf::from(required(config, S, "scaling_path")?),
            size_state_path: PathBuf::from(required(config, S, "size_state_path")?),
            positions_path: config.get_string(S, "positions_path").map(PathBuf::from),
            history_days: or_default(config, S, "history_days", 400)?,
        })
    }
}
