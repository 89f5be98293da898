//! CLI definition and dispatch.

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_live_feed::CsvLiveFeed;
use crate::adapters::csv_period_store::{write_atomic, CsvPeriodStore};
use crate::adapters::csv_results_adapter::CsvResultsAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::guarded_query::GuardedQuery;
use crate::domain::data_constructor::{DataConstructor, RunSummary};
use crate::domain::error::QuantwalkError;
use crate::domain::feature::parse_feature_list;
use crate::domain::feature_sql::{FeatureCompiler, SqlDialect};
use crate::domain::live::{LiveEngine, LiveOrder};
use crate::domain::settings::{
    construction_request, DatabaseBackend, LiveConfig, PlatformConfig, SimulationConfig,
};
use crate::domain::simulation::{hyperparameter_grid, Hyperparameters, Simulator};
use crate::domain::size_container::SizeContainer;
use crate::ports::config_port::ConfigPort;
use crate::ports::period_store::PeriodStore;
use crate::ports::query_port::QueryPort;

#[derive(Parser, Debug)]
#[command(name = "quantwalk", about = "Walk-forward equity research platform")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List strategies with stored data versions
    ListStrategies {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List data versions of a strategy
    ListVersions {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: String,
    },
    /// Build a new data version from the [construction] section
    Construct {
        #[arg(short, long)]
        config: PathBuf,
        /// Last date to construct through; defaults to today
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Regenerate incomplete trailing periods of an existing version
    Rerun {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: String,
        #[arg(short, long)]
        version: String,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Walk-forward simulation over every hyperparameter combination
    Simulate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: String,
        #[arg(short, long)]
        version: String,
        #[arg(long)]
        no_write: bool,
    },
    /// Print the SQL compiled for a list of feature mnemonics
    Compile {
        #[arg(required = true)]
        features: Vec<String>,
        #[arg(long, default_value = "sqlite")]
        dialect: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long, value_delimiter = ',')]
        sec_codes: Vec<String>,
        #[arg(long)]
        live: bool,
    },
    /// Generate share orders for the live date
    LiveOrders {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: String,
        #[arg(short, long)]
        version: String,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        training_qtrs: Option<usize>,
        #[arg(long)]
        holding_period: Option<usize>,
        #[arg(long)]
        per_side_count: Option<usize>,
        /// Orders CSV; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::ListStrategies { config } => {
            with_config(&config, |c| run_list_strategies(c))
        }
        Command::ListVersions { config, strategy } => {
            with_config(&config, |c| run_list_versions(c, &strategy))
        }
        Command::Construct { config, as_of } => {
            with_config(&config, |c| run_construct(c, as_of))
        }
        Command::Rerun {
            config,
            strategy,
            version,
            as_of,
        } => with_config(&config, |c| run_rerun(c, &strategy, &version, as_of)),
        Command::Simulate {
            config,
            strategy,
            version,
            no_write,
        } => with_config(&config, |c| run_simulate(c, &strategy, &version, no_write)),
        Command::Compile {
            features,
            dialect,
            start,
            end,
            sec_codes,
            live,
        } => run_compile(&features, &dialect, start, end, &sec_codes, live),
        Command::LiveOrders {
            config,
            strategy,
            version,
            date,
            training_qtrs,
            holding_period,
            per_side_count,
            output,
        } => with_config(&config, |c| {
            let overrides = (training_qtrs, holding_period, per_side_count);
            run_live_orders(c, &strategy, &version, date, overrides, output.as_deref())
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match &e {
                QuantwalkError::FeatureParse(p) => eprintln!("error:\n{}", p.display_with_context()),
                other => eprintln!("error: {other}"),
            }
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, QuantwalkError> {
    FileConfigAdapter::from_file(path)
}

fn with_config<F>(path: &Path, f: F) -> Result<(), QuantwalkError>
where
    F: FnOnce(&FileConfigAdapter) -> Result<(), QuantwalkError>,
{
    eprintln!("Loading config from {}", path.display());
    let config = load_config(path)?;
    f(&config)
}

/// Open the configured backend behind the blackout and retry guard.
pub fn open_query(
    config: &dyn ConfigPort,
    platform: &PlatformConfig,
) -> Result<GuardedQuery<Box<dyn QueryPort>>, QuantwalkError> {
    let inner: Box<dyn QueryPort> = match platform.database.backend {
        #[cfg(feature = "sqlite")]
        DatabaseBackend::Sqlite => Box::new(
            crate::adapters::sqlite_adapter::SqliteAdapter::from_config(config)?,
        ),
        #[cfg(feature = "postgres")]
        DatabaseBackend::Postgres => Box::new(
            crate::adapters::postgres_adapter::PostgresAdapter::from_config(config)?,
        ),
        #[allow(unreachable_patterns)]
        other => {
            let _ = config;
            return Err(QuantwalkError::ConfigInvalid {
                section: "database".into(),
                key: "backend".into(),
                reason: format!("{:?} support is not compiled in", other),
            });
        }
    };
    Ok(GuardedQuery::from_config(inner, &platform.database))
}

fn print_summary(label: &str, summary: &RunSummary) {
    eprintln!("\n=== {label} ===");
    eprintln!("Strategy:         {}", summary.strategy);
    eprintln!("Version:          {}", summary.version);
    eprintln!("Periods written:  {}", summary.written.len());
    eprintln!("Periods skipped:  {}", summary.skipped.len());
    if let Some(max) = summary.max_date {
        eprintln!("Max date:         {}", max);
    }
}

fn run_list_strategies(config: &dyn ConfigPort) -> Result<(), QuantwalkError> {
    let platform = PlatformConfig::from_config(config)?;
    let store = CsvPeriodStore::new(platform.data_root);
    for strategy in store.list_strategies()? {
        println!("{strategy}");
    }
    Ok(())
}

fn run_list_versions(config: &dyn ConfigPort, strategy: &str) -> Result<(), QuantwalkError> {
    let platform = PlatformConfig::from_config(config)?;
    let store = CsvPeriodStore::new(platform.data_root);
    for version in store.list_versions(strategy)? {
        let periods = store.list_periods(strategy, &version)?;
        match (periods.first(), periods.last()) {
            (Some(first), Some(last)) => {
                println!("{version}\t{} periods\t{first} .. {last}", periods.len())
            }
            _ => println!("{version}\t0 periods"),
        }
    }
    Ok(())
}

fn run_construct(config: &FileConfigAdapter, as_of: Option<NaiveDate>) -> Result<(), QuantwalkError> {
    let platform = PlatformConfig::from_config(config)?;
    let request = construction_request(config)?;
    let query = open_query(config, &platform)?;
    let store = CsvPeriodStore::new(platform.data_root.clone());

    eprintln!(
        "Constructing {} ({} features)",
        request.strategy,
        request.features.len()
    );
    let today = as_of.unwrap_or_else(|| Local::now().date_naive());
    let mut constructor = DataConstructor::new(&query, &store, platform.database.dialect, today);
    let summary = constructor.new_run(&request)?;
    print_summary("Construction", &summary);
    println!("{}", summary.version);
    Ok(())
}

fn run_rerun(
    config: &dyn ConfigPort,
    strategy: &str,
    version: &str,
    as_of: Option<NaiveDate>,
) -> Result<(), QuantwalkError> {
    let platform = PlatformConfig::from_config(config)?;
    let query = open_query(config, &platform)?;
    let store = CsvPeriodStore::new(platform.data_root.clone());

    let today = as_of.unwrap_or_else(|| Local::now().date_naive());
    let mut constructor = DataConstructor::new(&query, &store, platform.database.dialect, today);
    let summary = constructor.rerun(strategy, version)?;
    print_summary("Rerun", &summary);
    Ok(())
}

fn run_simulate(
    config: &dyn ConfigPort,
    strategy: &str,
    version: &str,
    no_write: bool,
) -> Result<(), QuantwalkError> {
    let platform = PlatformConfig::from_config(config)?;
    let sim_config = SimulationConfig::from_config(config)?;
    let store = CsvPeriodStore::new(platform.data_root);
    let results = CsvResultsAdapter::new(platform.results_root.clone());

    let grid = hyperparameter_grid(&sim_config);
    eprintln!(
        "Simulating {strategy}/{version}: {} hyperparameter combinations",
        grid.len()
    );

    let simulator = Simulator::new(&store, sim_config);
    let simulator = if no_write {
        simulator
    } else {
        simulator.with_results(&results)
    };
    let outcome = simulator.run(strategy, version)?;

    eprintln!("\n=== Simulation Results ({} periods) ===", outcome.periods);
    for summary in &outcome.summaries {
        let m = &summary.metrics;
        eprintln!(
            "  {:<20} return {:>8.2}%  sharpe {:>6.2}  sortino {:>6.2}  max dd {:>6.2}%  turnover {:>6.3}",
            summary.label,
            m.total_return * 100.0,
            m.sharpe_ratio,
            m.sortino_ratio,
            m.max_drawdown * 100.0,
            m.avg_turnover,
        );
    }
    if !no_write {
        eprintln!(
            "\nResults written to: {}",
            platform.results_root.join(strategy).join(version).display()
        );
    }
    Ok(())
}

fn run_compile(
    features: &[String],
    dialect: &str,
    start: NaiveDate,
    end: NaiveDate,
    sec_codes: &[String],
    live: bool,
) -> Result<(), QuantwalkError> {
    let dialect = SqlDialect::from_name(dialect).ok_or_else(|| QuantwalkError::InvalidState {
        reason: format!("unknown dialect '{}'", dialect),
    })?;
    let descriptors = parse_feature_list(features)?;
    let sql = FeatureCompiler::new(dialect).compile(&descriptors, sec_codes, start, end, live);
    println!("{sql}");
    Ok(())
}

/// Grid entry used for live sizing: explicit overrides on top of the first
/// configured combination.
fn live_hyperparameters(
    config: &SimulationConfig,
    overrides: (Option<usize>, Option<usize>, Option<usize>),
) -> Result<Hyperparameters, QuantwalkError> {
    let base = hyperparameter_grid(config)
        .into_iter()
        .next()
        .ok_or_else(|| QuantwalkError::InvalidState {
            reason: "empty hyperparameter grid".into(),
        })?;
    let (training_qtrs, holding_period, per_side_count) = overrides;
    Ok(Hyperparameters {
        training_qtrs: match training_qtrs {
            Some(0) => None,
            Some(n) => Some(n),
            None => base.training_qtrs,
        },
        holding_period: holding_period.unwrap_or(base.holding_period),
        per_side_count: per_side_count.unwrap_or(base.per_side_count),
    })
}

fn load_sizes(path: &Path, holding_period: usize) -> Result<SizeContainer, QuantwalkError> {
    if !path.exists() {
        eprintln!("No size state at {}, starting empty", path.display());
        return Ok(SizeContainer::new(holding_period));
    }
    SizeContainer::from_json(&fs::read_to_string(path)?)
}

fn write_orders(orders: &[LiveOrder], output: Option<&Path>) -> Result<(), QuantwalkError> {
    match output {
        Some(path) => {
            let mut wtr = csv::Writer::from_writer(Vec::new());
            for order in orders {
                wtr.serialize(order)?;
            }
            let bytes = wtr.into_inner().map_err(|e| QuantwalkError::Io(e.into_error()))?;
            write_atomic(path, &bytes)?;
            eprintln!("Orders written to: {}", path.display());
        }
        None => {
            let mut wtr = csv::Writer::from_writer(std::io::stdout());
            for order in orders {
                wtr.serialize(order)?;
            }
            wtr.flush()?;
        }
    }
    Ok(())
}

fn run_live_orders(
    config: &dyn ConfigPort,
    strategy: &str,
    version: &str,
    date: Option<NaiveDate>,
    overrides: (Option<usize>, Option<usize>, Option<usize>),
    output: Option<&Path>,
) -> Result<(), QuantwalkError> {
    let platform = PlatformConfig::from_config(config)?;
    let sim_config = SimulationConfig::from_config(config)?;
    let live = LiveConfig::from_config(config)?;
    let params = live_hyperparameters(&sim_config, overrides)?;

    let query = open_query(config, &platform)?;
    let store = CsvPeriodStore::new(platform.data_root.clone());
    let feed = CsvLiveFeed::new(
        live.prices_path.clone(),
        live.scaling_path.clone(),
        live.positions_path.clone(),
    );
    let sizes = load_sizes(&live.size_state_path, params.holding_period)?;
    let date = date.unwrap_or_else(|| Local::now().date_naive());

    eprintln!("Generating live orders for {strategy}/{version} on {date} ({})", params.label());
    let engine = LiveEngine::new(&query, &store, &feed, &sim_config, params, live.history_days);
    let outcome = engine.generate_orders(strategy, version, date, sizes)?;

    write_orders(&outcome.orders, output)?;
    write_atomic(&live.size_state_path, outcome.sizes.to_json()?.as_bytes())?;
    eprintln!(
        "{} signals, {} orders; size state saved to {}",
        outcome.signals.len(),
        outcome.orders.len(),
        live.size_state_path.display()
    );
    Ok(())
}
