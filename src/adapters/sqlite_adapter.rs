//! SQLite warehouse adapter.

use crate::domain::error::QuantwalkError;
use crate::ports::config_port::ConfigPort;
use crate::ports::query_port::{QueryPort, QueryResult, SqlValue};
use chrono::NaiveDate;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, params};
use std::time::{Duration, Instant};
use tracing::debug;

/// SQLite VM instructions between timeout checks.
const PROGRESS_STEPS: i32 = 10_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS security_master (
    SecCode INTEGER NOT NULL PRIMARY KEY,
    IssuerId INTEGER NOT NULL,
    Ticker TEXT,
    StartDate TEXT NOT NULL,
    EndDate TEXT
);
CREATE TABLE IF NOT EXISTS equity_prices (
    SecCode INTEGER NOT NULL,
    Date TEXT NOT NULL,
    Open REAL, High REAL, Low REAL, Close REAL, Vwap REAL, Volume REAL,
    AdjOpen REAL, AdjHigh REAL, AdjLow REAL, AdjClose REAL, AdjVwap REAL, AdjVolume REAL,
    AvgDolVol REAL,
    MarketCap REAL,
    SplitFactor REAL NOT NULL DEFAULT 1.0,
    Dividend REAL NOT NULL DEFAULT 0.0,
    NormalTradingFlag INTEGER NOT NULL DEFAULT 1,
    OneYearTradingFlag INTEGER NOT NULL DEFAULT 1,
    EarningsFlag INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (SecCode, Date)
);
CREATE INDEX IF NOT EXISTS idx_equity_prices_date ON equity_prices(Date);
CREATE TABLE IF NOT EXISTS index_prices (
    SecCode TEXT NOT NULL,
    Date TEXT NOT NULL,
    Open REAL, High REAL, Low REAL, Close REAL, Vwap REAL, Volume REAL,
    AdjOpen REAL, AdjHigh REAL, AdjLow REAL, AdjClose REAL, AdjVwap REAL, AdjVolume REAL,
    AvgDolVol REAL,
    MarketCap REAL,
    SplitFactor REAL NOT NULL DEFAULT 1.0,
    Dividend REAL NOT NULL DEFAULT 0.0,
    EarningsFlag INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (SecCode, Date)
);
CREATE TABLE IF NOT EXISTS trading_calendar (
    CalendarDate TEXT NOT NULL PRIMARY KEY
);";

/// One `equity_prices` row for seeding a database.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub sec_code: i64,
    pub date: NaiveDate,
    pub close: f64,
    pub adj_close: f64,
    pub volume: f64,
    pub avg_dol_vol: f64,
    pub market_cap: f64,
    pub split_factor: f64,
    pub dividend: f64,
    pub earnings_flag: bool,
}

impl PriceRow {
    /// An unadjusted row where every price field equals `close`.
    pub fn flat(sec_code: i64, date: NaiveDate, close: f64) -> Self {
        Self {
            sec_code,
            date,
            close,
            adj_close: close,
            volume: 1_000.0,
            avg_dol_vol: close * 1_000.0,
            market_cap: close * 1_000_000.0,
            split_factor: 1.0,
            dividend: 0.0,
            earnings_flag: false,
        }
    }
}

fn register_functions(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.create_scalar_function(
        "sqrt",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let v: Option<f64> = ctx.get(0)?;
            Ok(v.filter(|x| *x >= 0.0).map(f64::sqrt))
        },
    )
}

fn database_error(e: r2d2::Error) -> QuantwalkError {
    QuantwalkError::Database {
        reason: e.to_string(),
    }
}

fn query_error(e: rusqlite::Error) -> QuantwalkError {
    QuantwalkError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn is_interrupt(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::OperationInterrupted)
}

fn to_sql_value(v: ValueRef<'_>) -> SqlValue {
    match v {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(r) => SqlValue::Real(r),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => SqlValue::Null,
    }
}

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
    timeout: Option<Duration>,
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantwalkError> {
        let db_path =
            config
                .get_string("database", "path")
                .ok_or_else(|| QuantwalkError::ConfigMissing {
                    section: "database".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("database", "pool_size", 4).max(1) as u32;
        let timeout_secs = config.get_int("database", "query_timeout_secs", 1800);

        let manager = SqliteConnectionManager::file(&db_path).with_init(register_functions);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(database_error)?;

        Ok(Self {
            pool,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs as u64)),
        })
    }

    pub fn in_memory() -> Result<Self, QuantwalkError> {
        let manager = SqliteConnectionManager::memory().with_init(register_functions);
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(database_error)?;

        Ok(Self {
            pool,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn initialize_schema(&self) -> Result<(), QuantwalkError> {
        let conn = self.pool.get().map_err(database_error)?;
        conn.execute_batch(SCHEMA).map_err(query_error)?;
        Ok(())
    }

    pub fn insert_prices(&self, rows: &[PriceRow]) -> Result<(), QuantwalkError> {
        let mut conn = self.pool.get().map_err(database_error)?;
        let tx = conn.transaction().map_err(query_error)?;

        for r in rows {
            let p = r.close;
            let a = r.adj_close;
            tx.execute(
                "INSERT OR REPLACE INTO equity_prices (SecCode, Date, Open, High, Low, Close, Vwap, Volume,
                     AdjOpen, AdjHigh, AdjLow, AdjClose, AdjVwap, AdjVolume, AvgDolVol, MarketCap,
                     SplitFactor, Dividend, EarningsFlag)
                 VALUES (?1, ?2, ?3, ?3, ?3, ?3, ?3, ?4, ?5, ?5, ?5, ?5, ?5, ?4, ?6, ?7, ?8, ?9, ?10)",
                params![
                    r.sec_code,
                    r.date.format("%Y-%m-%d").to_string(),
                    p,
                    r.volume,
                    a,
                    r.avg_dol_vol,
                    r.market_cap,
                    r.split_factor,
                    r.dividend,
                    r.earnings_flag as i64,
                ],
            )
            .map_err(query_error)?;
        }

        tx.commit().map_err(query_error)?;
        Ok(())
    }

    pub fn insert_securities(
        &self,
        securities: &[(i64, i64, NaiveDate, Option<NaiveDate>)],
    ) -> Result<(), QuantwalkError> {
        let mut conn = self.pool.get().map_err(database_error)?;
        let tx = conn.transaction().map_err(query_error)?;
        for (sec_code, issuer_id, start, end) in securities {
            tx.execute(
                "INSERT OR REPLACE INTO security_master (SecCode, IssuerId, Ticker, StartDate, EndDate)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    sec_code,
                    issuer_id,
                    format!("S{}", sec_code),
                    start.format("%Y-%m-%d").to_string(),
                    end.map(|d| d.format("%Y-%m-%d").to_string()),
                ],
            )
            .map_err(query_error)?;
        }
        tx.commit().map_err(query_error)?;
        Ok(())
    }

    pub fn insert_calendar(&self, dates: &[NaiveDate]) -> Result<(), QuantwalkError> {
        let mut conn = self.pool.get().map_err(database_error)?;
        let tx = conn.transaction().map_err(query_error)?;
        for d in dates {
            tx.execute(
                "INSERT OR IGNORE INTO trading_calendar (CalendarDate) VALUES (?1)",
                params![d.format("%Y-%m-%d").to_string()],
            )
            .map_err(query_error)?;
        }
        tx.commit().map_err(query_error)?;
        Ok(())
    }
}

impl QueryPort for SqliteAdapter {
    fn execute(&self, sql: &str) -> Result<QueryResult, QuantwalkError> {
        let conn = self.pool.get().map_err(database_error)?;
        debug!(len = sql.len(), "sqlite query");

        if let Some(timeout) = self.timeout {
            let deadline = Instant::now() + timeout;
            conn.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= deadline));
        }

        let result = run_query(&conn, sql);
        if self.timeout.is_some() {
            conn.progress_handler(0, None::<fn() -> bool>);
        }

        result.map_err(|e| {
            if is_interrupt(&e) {
                QuantwalkError::QueryTimeout {
                    seconds: self.timeout.map(|t| t.as_secs()).unwrap_or(0),
                }
            } else {
                query_error(e)
            }
        })
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<QueryResult, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(to_sql_value(row.get_ref(i)?));
        }
        out.push(values);
    }
    Ok(QueryResult { columns, rows: out })
}
