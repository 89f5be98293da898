//! Feature SQL compiler.
//!
//! Every request compiles to the same three-CTE shape:
//!
//! ```text
//! stage_raw    base column (or period-over-period ratio for VOL)
//! stage_window rolling transform over the trailing N rows per security
//! stage_manip  LAG / LEAD by security, or cross-sectional RANK by date
//! ```
//!
//! Stages that a feature does not use pass the prior alias through, so the
//! shape is identical for every feature list.

use crate::domain::feature::{FeatureDescriptor, Manipulation, WindowVariable};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calendar days pulled ahead of the requested start so rolling windows are
/// fully populated on the first requested date.
pub const LOOKBACK_BUFFER_DAYS: i64 = 365;

pub const PRICE_TABLE: &str = "equity_prices";
pub const INDEX_TABLE: &str = "index_prices";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    #[default]
    SqlServer,
    Postgres,
    Sqlite,
}

impl SqlDialect {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "sqlserver" | "mssql" | "sql_server" => Some(SqlDialect::SqlServer),
            "postgres" | "postgresql" => Some(SqlDialect::Postgres),
            "sqlite" => Some(SqlDialect::Sqlite),
            _ => None,
        }
    }

    /// Rolling sample standard deviation of `expr` over `over`.
    fn stdev(self, expr: &str, over: &str) -> String {
        match self {
            SqlDialect::SqlServer => format!("STDEV({expr}) {over}"),
            SqlDialect::Postgres => format!("STDDEV_SAMP({expr}) {over}"),
            // sqrt is registered on every pooled connection by the SQLite adapter.
            SqlDialect::Sqlite => format!(
                "sqrt(max((SUM({expr} * {expr}) {over} - SUM({expr}) {over} * SUM({expr}) {over} \
                 / COUNT({expr}) {over}) / NULLIF(COUNT({expr}) {over} - 1, 0), 0.0))"
            ),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlDialect::SqlServer => "sqlserver",
            SqlDialect::Postgres => "postgres",
            SqlDialect::Sqlite => "sqlite",
        };
        write!(f, "{}", name)
    }
}

/// Render a SecCode as a SQL literal: bare when numeric, quoted otherwise.
pub fn sec_code_literal(code: &str) -> String {
    if !code.is_empty() && code.chars().all(|c| c.is_ascii_digit()) {
        code.to_string()
    } else {
        format!("'{}'", code.replace('\'', "''"))
    }
}

pub fn date_literal(date: NaiveDate) -> String {
    format!("'{}'", date.format("%Y-%m-%d"))
}

fn rolling_window(length: usize) -> String {
    format!(
        "OVER (PARTITION BY SecCode ORDER BY Date ROWS BETWEEN {} PRECEDING AND CURRENT ROW)",
        length.saturating_sub(1)
    )
}

const BY_SECURITY: &str = "OVER (PARTITION BY SecCode ORDER BY Date)";

fn clamp_unit(expr: &str) -> String {
    format!(
        "CASE WHEN ({e}) IS NULL THEN NULL WHEN ({e}) < 0 THEN 0.0 WHEN ({e}) > 1 THEN 1.0 ELSE ({e}) END",
        e = expr
    )
}

#[derive(Debug, Clone)]
pub struct FeatureCompiler {
    dialect: SqlDialect,
    table: String,
}

impl FeatureCompiler {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            table: PRICE_TABLE.to_string(),
        }
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Distinct base columns as `(table column, output alias)`, in first-seen
    /// order, excluding aliases that collide with a requested mnemonic.
    pub fn passthrough_columns(features: &[FeatureDescriptor]) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        for d in features {
            let alias = d.base.mnemonic();
            if features.iter().any(|f| f.mnemonic == alias) {
                continue;
            }
            if !out.iter().any(|(_, a)| *a == alias) {
                out.push((d.base.column_name(), alias));
            }
        }
        out
    }

    fn raw_expr(&self, d: &FeatureDescriptor) -> String {
        let col = d.base.column_name();
        match d.window {
            Some(WindowVariable::Vol(_)) => {
                format!("{col} * 1.0 / NULLIF(LAG({col}, 1) {BY_SECURITY}, 0)")
            }
            _ => col,
        }
    }

    fn window_expr(&self, d: &FeatureDescriptor, input: &str) -> String {
        let window = match d.window {
            Some(w) => w,
            None => return input.to_string(),
        };
        let over = rolling_window(window.length());
        match window {
            WindowVariable::Ma(_) => format!("AVG({input}) {over}"),
            WindowVariable::Prma(_) => {
                format!("{input} * 1.0 / NULLIF(AVG({input}) {over}, 0)")
            }
            WindowVariable::Vol(_) => self.dialect.stdev(input, &over),
            WindowVariable::Boll(_) => {
                let sd = self.dialect.stdev(input, &over);
                let position = format!(
                    "({input} - (AVG({input}) {over} - 2 * {sd})) / NULLIF(4 * {sd}, 0)"
                );
                clamp_unit(&position)
            }
        }
    }

    fn manipulation_expr(&self, d: &FeatureDescriptor, input: &str, live: bool) -> String {
        match d.manipulation {
            None => input.to_string(),
            Some(Manipulation::Lag(n)) => format!("LAG({input}, {n}) {BY_SECURITY}"),
            Some(Manipulation::Lead(_)) if live => "NULL".to_string(),
            Some(Manipulation::Lead(n)) => format!("LEAD({input}, {n}) {BY_SECURITY}"),
            Some(Manipulation::Rank(n)) => format!(
                "CASE WHEN {input} IS NULL THEN NULL ELSE NTILE({n}) OVER (PARTITION BY Date, \
                 CASE WHEN {input} IS NULL THEN 1 ELSE 0 END ORDER BY {input}) END"
            ),
        }
    }

    /// Compile `features` for `sec_codes` over `[start, end]`.
    ///
    /// With `live` set, forward-looking manipulations compile to `NULL`.
    pub fn compile(
        &self,
        features: &[FeatureDescriptor],
        sec_codes: &[String],
        start: NaiveDate,
        end: NaiveDate,
        live: bool,
    ) -> String {
        let buffered_start = start - Duration::days(LOOKBACK_BUFFER_DAYS);
        let passthrough = Self::passthrough_columns(features);

        let carried: Vec<String> = passthrough.iter().map(|(col, _)| format!("p_{col}")).collect();

        let security_filter = if sec_codes.is_empty() {
            "1 = 0".to_string()
        } else {
            let list: Vec<String> = sec_codes.iter().map(|c| sec_code_literal(c)).collect();
            format!("SecCode IN ({})", list.join(", "))
        };

        let mut raw_cols: Vec<String> = vec!["SecCode".into(), "Date".into()];
        raw_cols.extend(passthrough.iter().map(|(col, _)| format!("{col} AS p_{col}")));
        raw_cols.extend(
            features
                .iter()
                .enumerate()
                .map(|(i, d)| format!("{} AS f{i}_raw", self.raw_expr(d))),
        );

        let mut window_cols: Vec<String> = vec!["SecCode".into(), "Date".into()];
        window_cols.extend(carried.iter().cloned());
        window_cols.extend(
            features
                .iter()
                .enumerate()
                .map(|(i, d)| format!("{} AS f{i}_win", self.window_expr(d, &format!("f{i}_raw")))),
        );

        let mut manip_cols: Vec<String> = vec!["SecCode".into(), "Date".into()];
        manip_cols.extend(carried.iter().cloned());
        manip_cols.extend(features.iter().enumerate().map(|(i, d)| {
            format!(
                "{} AS f{i}_out",
                self.manipulation_expr(d, &format!("f{i}_win"), live)
            )
        }));

        let mut final_cols: Vec<String> =
            vec!["SecCode AS \"SecCode\"".into(), "Date AS \"Date\"".into()];
        final_cols.extend(
            passthrough
                .iter()
                .map(|(col, alias)| format!("p_{col} AS \"{alias}\"")),
        );
        final_cols.extend(
            features
                .iter()
                .enumerate()
                .map(|(i, d)| format!("f{i}_out AS \"{}\"", d.mnemonic)),
        );

        let sep = ",\n    ";
        format!(
            "WITH stage_raw AS (\n  SELECT\n    {raw}\n  FROM {table}\n  WHERE {filter}\n    \
             AND Date >= {buffered} AND Date <= {end}\n),\n\
             stage_window AS (\n  SELECT\n    {window}\n  FROM stage_raw\n),\n\
             stage_manip AS (\n  SELECT\n    {manip}\n  FROM stage_window\n)\n\
             SELECT\n    {fin}\nFROM stage_manip\nWHERE Date >= {start} AND Date <= {end}\n\
             ORDER BY SecCode, Date",
            raw = raw_cols.join(sep),
            table = self.table,
            filter = security_filter,
            buffered = date_literal(buffered_start),
            end = date_literal(end),
            window = window_cols.join(sep),
            manip = manip_cols.join(sep),
            fin = final_cols.join(sep),
            start = date_literal(start),
        )
    }
}
