#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, Weekday};
use quantwalk::adapters::csv_period_store::CsvPeriodStore;
use quantwalk::adapters::sqlite_adapter::{PriceRow, SqliteAdapter};
use quantwalk::domain::data_constructor::ConstructionRequest;
use quantwalk::domain::date_iterator::{DateParameters, Frequency};
use quantwalk::domain::error::QuantwalkError;
use quantwalk::domain::period::{PeriodFrame, PeriodRow};
use quantwalk::domain::universe::UniverseArgs;
use quantwalk::domain::version::{ConstructorType, FilterArguments};
use quantwalk::ports::live_feed_port::{LiveFeedPort, LiveQuote, ScalingFactor};
use quantwalk::ports::query_port::{QueryPort, QueryResult};
use std::cell::RefCell;
use std::collections::BTreeMap;
use tempfile::TempDir;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Monday to Friday in `[start, end]`.
pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

/// Canned query responses keyed by a SQL substring, with a log of every
/// statement executed.
pub struct MockQueryPort {
    pub responses: Vec<(String, QueryResult)>,
    pub error: Option<String>,
    pub log: RefCell<Vec<String>>,
}

impl MockQueryPort {
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            error: None,
            log: RefCell::new(Vec::new()),
        }
    }

    pub fn with_response(mut self, fragment: &str, result: QueryResult) -> Self {
        self.responses.push((fragment.to_string(), result));
        self
    }

    pub fn with_error(mut self, reason: &str) -> Self {
        self.error = Some(reason.to_string());
        self
    }

    pub fn executed(&self) -> usize {
        self.log.borrow().len()
    }
}

impl QueryPort for MockQueryPort {
    fn execute(&self, sql: &str) -> Result<QueryResult, QuantwalkError> {
        self.log.borrow_mut().push(sql.to_string());
        if let Some(reason) = &self.error {
            return Err(QuantwalkError::Database {
                reason: reason.clone(),
            });
        }
        Ok(self
            .responses
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_default())
    }
}

/// `(SecCode, IssuerId, base price)`; 101 and 102 share an issuer.
pub const SECURITIES: [(i64, i64, f64); 6] = [
    (101, 1, 50.0),
    (102, 1, 52.0),
    (103, 2, 30.0),
    (104, 3, 80.0),
    (105, 4, 45.0),
    (106, 5, 60.0),
];

/// Deterministic oscillating price path per security.
pub fn price(sec_code: i64, day: usize, base: f64) -> f64 {
    let phase = day as f64 * 0.21 + sec_code as f64;
    base * (1.0 + 0.1 * phase.sin()) + 0.01 * day as f64
}

/// In-memory warehouse with daily prices for [`SECURITIES`] over the
/// weekdays of 2018 through 2020.
pub fn seeded_warehouse() -> SqliteAdapter {
    let db = SqliteAdapter::in_memory().unwrap();
    seed(&db);
    db
}

pub fn seed(db: &SqliteAdapter) {
    db.initialize_schema().unwrap();
    let days = weekdays(date(2018, 1, 1), date(2020, 12, 31));
    db.insert_calendar(&days).unwrap();
    let master: Vec<(i64, i64, NaiveDate, Option<NaiveDate>)> = SECURITIES
        .iter()
        .map(|(sec, issuer, _)| (*sec, *issuer, date(2010, 1, 1), None))
        .collect();
    db.insert_securities(&master).unwrap();

    let mut rows = Vec::with_capacity(days.len() * SECURITIES.len());
    for (sec, _, base) in SECURITIES {
        for (i, d) in days.iter().enumerate() {
            rows.push(PriceRow::flat(sec, *d, price(sec, i, base)));
        }
    }
    db.insert_prices(&rows).unwrap();
}

pub const FEATURES: [&str; 7] = [
    "AdjClose",
    "RClose",
    "PRMA10_AdjClose",
    "VOL10_AdjClose",
    "LAG1_MA5_AdjClose",
    "RANK5_AdjClose",
    "LEAD2_AdjClose",
];

pub fn quarterly(start_year: i32) -> DateParameters {
    DateParameters {
        frequency: Frequency::Quarterly,
        month_offset: 0,
        train_periods: 4,
        test_periods: 1,
        start_year,
    }
}

pub fn universe_request(strategy: &str) -> ConstructionRequest {
    ConstructionRequest {
        strategy: strategy.to_string(),
        description: "integration".into(),
        constructor_type: ConstructorType::Universe,
        features: FEATURES.iter().map(|s| s.to_string()).collect(),
        date_parameters: Some(quarterly(2020)),
        filter_arguments: FilterArguments {
            universe: Some(UniverseArgs {
                filter_where: "1 = 1".into(),
                rank_column: "AvgDolVol".into(),
                size: 10,
            }),
            ids: Vec::new(),
        },
    }
}

pub fn temp_store() -> (TempDir, CsvPeriodStore) {
    let dir = TempDir::new().unwrap();
    let store = CsvPeriodStore::new(dir.path().join("data"));
    (dir, store)
}

/// Frame over one column from `(sec, date, test, value)` tuples.
pub fn single_column_frame(column: &str, rows: &[(&str, NaiveDate, bool, f64)]) -> PeriodFrame {
    let mut frame = PeriodFrame::new(vec![column.to_string()]);
    for (sec, d, test, v) in rows {
        frame.push(PeriodRow {
            sec_code: sec.to_string(),
            date: *d,
            test_flag: *test,
            values: vec![Some(*v)],
        });
    }
    frame
}

pub struct MockLiveFeed {
    pub quotes: Vec<LiveQuote>,
    pub scaling: Vec<ScalingFactor>,
    pub holdings: BTreeMap<String, f64>,
}

impl MockLiveFeed {
    pub fn new() -> Self {
        Self {
            quotes: Vec::new(),
            scaling: Vec::new(),
            holdings: BTreeMap::new(),
        }
    }

    pub fn with_quote(mut self, sec_code: &str, close: f64) -> Self {
        self.quotes.push(quote(sec_code, close));
        self
    }

    pub fn with_holding(mut self, sec_code: &str, shares: f64) -> Self {
        self.holdings.insert(sec_code.to_string(), shares);
        self
    }
}

impl LiveFeedPort for MockLiveFeed {
    fn snapshot(&self) -> Result<Vec<LiveQuote>, QuantwalkError> {
        Ok(self.quotes.clone())
    }

    fn scaling(&self) -> Result<Vec<ScalingFactor>, QuantwalkError> {
        Ok(self.scaling.clone())
    }

    fn holdings(&self) -> Result<BTreeMap<String, f64>, QuantwalkError> {
        Ok(self.holdings.clone())
    }
}

pub fn quote(sec_code: &str, close: f64) -> LiveQuote {
    LiveQuote {
        sec_code: sec_code.to_string(),
        ticker: format!("S{sec_code}"),
        adj_open: Some(close),
        adj_high: Some(close),
        adj_low: Some(close),
        adj_close: Some(close),
        adj_volume: Some(1_000.0),
        adj_vwap: Some(close),
    }
}
