//! End-to-end runs through the command line entry point against a file-backed
//! SQLite warehouse.

#![cfg(feature = "sqlite")]

mod common;

use clap::Parser;
use common::*;
use quantwalk::adapters::csv_period_store::CsvPeriodStore;
use quantwalk::adapters::sqlite_adapter::SqliteAdapter;
use quantwalk::cli::{Cli, load_config, run};
use quantwalk::domain::size_container::SizeContainer;
use quantwalk::ports::period_store::PeriodStore;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn config_arg(&self) -> String {
        self.config.display().to_string()
    }

    fn store(&self) -> CsvPeriodStore {
        CsvPeriodStore::new(self.path("data"))
    }
}

fn setup() -> Workspace {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let ini = format!(
        "[paths]\n\
         data_root = {data}\n\
         results_root = {results}\n\
         [database]\n\
         backend = sqlite\n\
         dialect = sqlite\n\
         path = {db}\n\
         pool_size = 2\n\
         blackout_start = none\n\
         [construction]\n\
         strategy = momo\n\
         description = cli run\n\
         features = {features}\n\
         constructor_type = universe\n\
         frequency = quarterly\n\
         start_year = 2020\n\
         rank_column = AvgDolVol\n\
         universe_size = 10\n\
         [simulation]\n\
         response_days = 2, 4\n\
         training_qtrs = 0\n\
         holding_period = 3\n\
         per_side_count = 2\n\
         booksize = 1200000\n\
         [live]\n\
         prices_path = {prices}\n\
         scaling_path = {scaling}\n\
         size_state_path = {sizes}\n\
         positions_path = {positions}\n",
        data = root.join("data").display(),
        results = root.join("results").display(),
        db = root.join("warehouse.db").display(),
        features = FEATURES.join(", "),
        prices = root.join("prices.csv").display(),
        scaling = root.join("scaling.csv").display(),
        sizes = root.join("sizes.json").display(),
        positions = root.join("positions.csv").display(),
    );
    let config = root.join("quantwalk.ini");
    fs::write(&config, ini).unwrap();

    let db = SqliteAdapter::from_config(&load_config(&config).unwrap()).unwrap();
    seed(&db);

    Workspace { dir, config }
}

fn exec(args: &[&str]) -> ExitCode {
    let mut argv = vec!["quantwalk"];
    argv.extend_from_slice(args);
    run(Cli::try_parse_from(argv).unwrap())
}

fn succeeded(code: ExitCode) -> bool {
    format!("{code:?}") == format!("{:?}", ExitCode::SUCCESS)
}

fn construct(ws: &Workspace) {
    let code = exec(&["construct", "-c", &ws.config_arg(), "--as-of", "2020-12-31"]);
    assert!(succeeded(code));
}

fn write_live_inputs(ws: &Workspace, universe: &[String], skip: Option<&str>) {
    let mut prices = String::from("SecCode,Ticker,AdjOpen,AdjHigh,AdjLow,AdjClose,AdjVolume,AdjVwap\n");
    for (i, sec) in universe.iter().enumerate() {
        if Some(sec.as_str()) == skip {
            continue;
        }
        let p = 40.0 + i as f64;
        prices.push_str(&format!("{sec},S{sec},{p},{p},{p},{p},1000,{p}\n"));
    }
    fs::write(ws.path("prices.csv"), prices).unwrap();
    fs::write(ws.path("scaling.csv"), "SecCode,DividendFactor,SplitFactor\n").unwrap();
    fs::write(ws.path("positions.csv"), format!("SecCode,Shares\n{},250\n", universe[0])).unwrap();
}

fn latest_universe(store: &CsvPeriodStore) -> Vec<String> {
    let frame = store.read_period("momo", "version_001", date(2020, 10, 1)).unwrap();
    frame
        .rows
        .iter()
        .map(|r| r.sec_code.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn csv_rows(path: &Path) -> Vec<csv::StringRecord> {
    csv::Reader::from_path(path)
        .unwrap()
        .records()
        .map(Result::unwrap)
        .collect()
}

#[test]
fn construct_writes_a_version_under_data_root() {
    let ws = setup();
    construct(&ws);

    let store = ws.store();
    assert_eq!(store.list_strategies().unwrap(), vec!["momo".to_string()]);
    assert_eq!(
        store.list_periods("momo", "version_001").unwrap(),
        vec![date(2020, 1, 1), date(2020, 4, 1), date(2020, 7, 1), date(2020, 10, 1)]
    );
    let meta = store.read_metadata("momo", "version_001").unwrap();
    assert_eq!(meta.description, "cli run");
    assert_eq!(meta.features.len(), FEATURES.len());
}

#[test]
fn rerun_restores_a_removed_period() {
    let ws = setup();
    construct(&ws);
    let store = ws.store();
    store.remove_period("momo", "version_001", date(2020, 10, 1)).unwrap();

    let code = exec(&[
        "rerun", "-c", &ws.config_arg(), "-s", "momo", "-v", "version_001", "--as-of", "2020-12-31",
    ]);
    assert!(succeeded(code));
    assert_eq!(store.list_periods("momo", "version_001").unwrap().len(), 4);
}

#[test]
fn simulate_writes_results_unless_disabled() {
    let ws = setup();
    construct(&ws);

    let code = exec(&["simulate", "-c", &ws.config_arg(), "-s", "momo", "-v", "version_001", "--no-write"]);
    assert!(succeeded(code));
    assert!(!ws.path("results").exists());

    let code = exec(&["simulate", "-c", &ws.config_arg(), "-s", "momo", "-v", "version_001"]);
    assert!(succeeded(code));
    let run_dir = ws.path("results").join("momo").join("version_001");
    assert!(run_dir.join("summary.csv").is_file());
    assert!(run_dir.join("tq0_hp3_ps2").is_dir());
}

#[test]
fn live_orders_write_orders_and_size_state() {
    let ws = setup();
    construct(&ws);
    let universe = latest_universe(&ws.store());
    write_live_inputs(&ws, &universe, None);

    let orders = ws.path("orders.csv");
    let code = exec(&[
        "live-orders",
        "-c",
        &ws.config_arg(),
        "-s",
        "momo",
        "-v",
        "version_001",
        "--date",
        "2021-01-04",
        "-o",
        orders.to_str().unwrap(),
    ]);
    assert!(succeeded(code));

    let rows = csv_rows(&orders);
    let held = rows.iter().find(|r| &r[0] == universe[0].as_str()).unwrap();
    assert_eq!(held[5].parse::<f64>().unwrap(), 250.0);
    let sizes = SizeContainer::from_json(&fs::read_to_string(ws.path("sizes.json")).unwrap()).unwrap();
    assert_eq!(sizes.n_days(), 3);
    assert_eq!(sizes.dates(), vec![date(2021, 1, 4)]);
}

#[test]
fn live_orders_fail_without_a_price_and_keep_state() {
    let ws = setup();
    construct(&ws);
    let universe = latest_universe(&ws.store());
    write_live_inputs(&ws, &universe, Some(universe[1].as_str()));

    let code = exec(&[
        "live-orders",
        "-c",
        &ws.config_arg(),
        "-s",
        "momo",
        "-v",
        "version_001",
        "--date",
        "2021-01-04",
        "-o",
        ws.path("orders.csv").to_str().unwrap(),
    ]);
    assert!(!succeeded(code));
    assert!(!ws.path("orders.csv").exists());
    assert!(!ws.path("sizes.json").exists());
}

#[test]
fn failures_map_to_non_zero_exit_codes() {
    let ws = setup();

    let missing = ws.path("absent.ini");
    assert!(!succeeded(exec(&["list-strategies", "-c", missing.to_str().unwrap()])));
    assert!(!succeeded(exec(&[
        "simulate", "-c", &ws.config_arg(), "-s", "momo", "-v", "version_001",
    ])));
    assert!(!succeeded(exec(&[
        "compile", "LAG1_NOPE", "--start", "2020-01-01", "--end", "2020-03-31",
    ])));
    assert!(succeeded(exec(&[
        "compile", "LAG1_RClose", "--start", "2020-01-01", "--end", "2020-03-31", "--sec-codes", "101,102",
    ])));
}
