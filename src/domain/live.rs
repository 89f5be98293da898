//! Live order generation.
//!
//! Stored history is rescaled onto today's adjustment basis, the intraday
//! snapshot is appended as the single test date, features are evaluated
//! in-memory with forward-looking outputs disabled, and the model fitted on
//! the version's latest period scores the snapshot. Target sizes come from a
//! persisted [`SizeContainer`]; orders are target shares minus holdings.

use crate::domain::constructor::{ConstructorParams, select_positions};
use crate::domain::container::{DataContainer, EARNINGS_FLAG_COLUMN, PrepParams, RollingContainer};
use crate::domain::data_constructor::frame_from_result;
use crate::domain::error::QuantwalkError;
use crate::domain::feature::{FeatureDescriptor, parse_feature_list};
use crate::domain::feature_eval::evaluate;
use crate::domain::feature_sql::{PRICE_TABLE, date_literal, sec_code_literal};
use crate::domain::period::{PeriodFrame, PeriodRow, cmp_sec_codes};
use crate::domain::settings::SimulationConfig;
use crate::domain::signal::Signal;
use crate::domain::simulation::{Hyperparameters, period_signals};
use crate::domain::size_container::SizeContainer;
use crate::ports::live_feed_port::{LiveFeedPort, LiveQuote, ScalingFactor};
use crate::ports::period_store::PeriodStore;
use crate::ports::query_port::QueryPort;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

const ADJUSTED_PRICES: [&str; 5] = ["AdjOpen", "AdjHigh", "AdjLow", "AdjClose", "AdjVwap"];
const ADJUSTED_VOLUME: &str = "AdjVolume";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveOrder {
    #[serde(rename = "SecCode")]
    pub sec_code: String,
    #[serde(rename = "Ticker")]
    pub ticker: String,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "TargetDollars")]
    pub target_dollars: f64,
    #[serde(rename = "TargetShares")]
    pub target_shares: f64,
    #[serde(rename = "CurrentShares")]
    pub current_shares: f64,
    #[serde(rename = "OrderShares")]
    pub order_shares: f64,
}

#[derive(Debug, Clone)]
pub struct LiveOutcome {
    pub date: NaiveDate,
    pub signals: Vec<Signal>,
    pub orders: Vec<LiveOrder>,
    /// Updated sizing state, to be persisted by the caller.
    pub sizes: SizeContainer,
}

/// Stored pricing history for `sec_codes` over `[start, end)`.
pub fn base_history_sql(
    columns: &[String],
    sec_codes: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> String {
    let filter = if sec_codes.is_empty() {
        "1 = 0".to_string()
    } else {
        let list: Vec<String> = sec_codes.iter().map(|c| sec_code_literal(c)).collect();
        format!("SecCode IN ({})", list.join(", "))
    };
    let mut select = vec!["SecCode AS \"SecCode\"".to_string(), "Date AS \"Date\"".to_string()];
    select.extend(columns.iter().map(|c| format!("{c} AS \"{c}\"")));
    format!(
        "SELECT {cols}\nFROM {table}\nWHERE {filter}\n  AND Date >= {start} AND Date < {end}\nORDER BY SecCode, Date",
        cols = select.join(", "),
        table = PRICE_TABLE,
        start = date_literal(start),
        end = date_literal(end),
    )
}

/// Multiply adjusted prices by both factors and divide adjusted volume by the
/// split factor, for every security with a scaling entry.
pub fn rescale_history(frame: &mut PeriodFrame, scaling: &[ScalingFactor]) {
    let factors: HashMap<&str, &ScalingFactor> =
        scaling.iter().map(|s| (s.sec_code.as_str(), s)).collect();
    let price_idx: Vec<usize> = ADJUSTED_PRICES
        .iter()
        .filter_map(|c| frame.column_index(c))
        .collect();
    let volume_idx = frame.column_index(ADJUSTED_VOLUME);

    for row in &mut frame.rows {
        let Some(f) = factors.get(row.sec_code.as_str()) else {
            continue;
        };
        let price_mult = f.dividend_factor * f.split_factor;
        for &i in &price_idx {
            if let Some(v) = row.values[i].as_mut() {
                *v *= price_mult;
            }
        }
        if let Some(i) = volume_idx {
            if f.split_factor > 0.0 {
                if let Some(v) = row.values[i].as_mut() {
                    *v /= f.split_factor;
                }
            }
        }
    }
}

/// Raw columns read the adjusted quote: adjustment factors are 1 on the live
/// date, so the snapshot's raw and adjusted prices coincide.
fn quote_value(quote: &LiveQuote, column: &str) -> Option<Option<f64>> {
    let v = match column {
        "AdjOpen" | "Open" => quote.adj_open,
        "AdjHigh" | "High" => quote.adj_high,
        "AdjLow" | "Low" => quote.adj_low,
        "AdjClose" | "Close" => quote.adj_close,
        "AdjVolume" | "Volume" => quote.adj_volume,
        "AdjVwap" | "Vwap" => quote.adj_vwap,
        "Dividend" | "EarningsFlag" => Some(0.0),
        "SplitFactor" => Some(1.0),
        _ => return None,
    };
    Some(v)
}

/// One test row per universe member dated `date`, shaped like `history`.
/// Columns the snapshot does not carry repeat the member's last stored value.
pub fn snapshot_rows(
    history: &PeriodFrame,
    quotes: &[LiveQuote],
    universe: &[String],
    date: NaiveDate,
) -> Result<PeriodFrame, QuantwalkError> {
    let by_sec: HashMap<&str, &LiveQuote> = quotes.iter().map(|q| (q.sec_code.as_str(), q)).collect();
    let mut last: HashMap<&str, &PeriodRow> = HashMap::new();
    for row in &history.rows {
        last.insert(row.sec_code.as_str(), row);
    }

    let mut out = PeriodFrame::new(history.columns.clone());
    for sec in universe {
        let quote = by_sec
            .get(sec.as_str())
            .filter(|q| q.adj_close.is_some())
            .ok_or_else(|| QuantwalkError::MissingLivePrice {
                sec_code: sec.clone(),
            })?;
        let values = history
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| match quote_value(quote, c) {
                Some(v) => v,
                None => last
                    .get(sec.as_str())
                    .and_then(|r| r.values.get(i).copied().flatten()),
            })
            .collect();
        out.push(PeriodRow {
            sec_code: sec.clone(),
            date,
            test_flag: true,
            values,
        });
    }
    Ok(out)
}

fn base_columns(features: &[FeatureDescriptor], config: &SimulationConfig) -> Vec<String> {
    let mut cols: BTreeSet<String> = features.iter().map(|d| d.base.column_name()).collect();
    cols.insert("AdjClose".into());
    if let Ok(d) = crate::domain::feature::parse_mnemonic(&config.prep.response_column) {
        cols.insert(d.base.column_name());
    }
    if config.prep.earnings.is_some() {
        cols.insert(EARNINGS_FLAG_COLUMN.into());
    }
    cols.into_iter().collect()
}

pub struct LiveEngine<'a> {
    query: &'a dyn QueryPort,
    store: &'a dyn PeriodStore,
    feed: &'a dyn LiveFeedPort,
    config: &'a SimulationConfig,
    params: Hyperparameters,
    history_days: i64,
}

impl<'a> LiveEngine<'a> {
    pub fn new(
        query: &'a dyn QueryPort,
        store: &'a dyn PeriodStore,
        feed: &'a dyn LiveFeedPort,
        config: &'a SimulationConfig,
        params: Hyperparameters,
        history_days: i64,
    ) -> Self {
        Self {
            query,
            store,
            feed,
            config,
            params,
            history_days,
        }
    }

    fn constructor_params(&self) -> ConstructorParams {
        ConstructorParams {
            holding_period: self.params.holding_period,
            per_side_count: self.params.per_side_count,
            ..self.config.constructor.clone()
        }
    }

    pub fn generate_orders(
        &self,
        strategy: &str,
        version: &str,
        date: NaiveDate,
        mut sizes: SizeContainer,
    ) -> Result<LiveOutcome, QuantwalkError> {
        if sizes.n_days() != self.params.holding_period {
            return Err(QuantwalkError::InvalidState {
                reason: format!(
                    "size state holds {} days but the holding period is {}",
                    sizes.n_days(),
                    self.params.holding_period
                ),
            });
        }

        let meta = self.store.read_metadata(strategy, version)?;
        let features = parse_feature_list(&meta.features)?;
        let latest_period = self
            .store
            .list_periods(strategy, version)?
            .last()
            .copied()
            .ok_or_else(|| QuantwalkError::VersionNotFound {
                strategy: strategy.to_string(),
                version: version.to_string(),
            })?;
        let latest = self.store.read_period(strategy, version, latest_period)?;

        let mut universe: Vec<String> = latest
            .rows
            .iter()
            .map(|r| r.sec_code.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        universe.sort_by(|a, b| cmp_sec_codes(a, b));

        let sql = base_history_sql(
            &base_columns(&features, self.config),
            &universe,
            date - Duration::days(self.history_days),
            date,
        );
        debug!(%sql, "live history query");
        let mut history = frame_from_result(&self.query.execute(&sql)?, date)?;
        rescale_history(&mut history, &self.feed.scaling()?);

        let quotes = self.feed.snapshot()?;
        let snapshot = snapshot_rows(&history, &quotes, &universe, date)?;
        history.append(&snapshot);
        history.sort();
        history.ensure_unique()?;

        let live_frame = evaluate(&features, &history, true)?.test_rows();

        let mut container = RollingContainer::new(None);
        container.add_data(latest, 0)?;
        container.add_data(live_frame, 0)?;
        let prep = PrepParams {
            training_qtrs: self.params.training_qtrs,
            ..self.config.prep.clone()
        };
        let signals = period_signals(&container, 0, &prep, self.config)?;

        let ctor = self.constructor_params();
        let mut scores: HashMap<String, f64> = HashMap::new();
        if let (Some(column), Some(frame)) = (&ctor.score_column, container.current_frame()) {
            if let Some(idx) = frame.column_index(column) {
                for row in &frame.rows {
                    if let Some(v) = row.values.get(idx).copied().flatten() {
                        scores.insert(row.sec_code.clone(), v);
                    }
                }
            }
        }
        let pairs: Vec<(String, f64)> = signals.iter().map(|s| (s.sec_code.clone(), s.value)).collect();
        let selection = select_positions(&pairs, &scores, &ctor);

        let increment = ctor.increment();
        let mut increments: BTreeMap<String, f64> = BTreeMap::new();
        for sec in &selection.longs {
            *increments.entry(sec.clone()).or_insert(0.0) += increment;
        }
        for sec in &selection.shorts {
            *increments.entry(sec.clone()).or_insert(0.0) -= increment;
        }
        sizes.update_sizes(date, increments);
        let targets = sizes.get_sizes();

        let holdings = self.feed.holdings()?;
        let by_sec: HashMap<&str, &LiveQuote> = quotes.iter().map(|q| (q.sec_code.as_str(), q)).collect();
        let symbols: BTreeSet<&String> = targets
            .keys()
            .chain(holdings.iter().filter(|(_, s)| **s != 0.0).map(|(k, _)| k))
            .collect();

        let mut orders = Vec::with_capacity(symbols.len());
        for sec in symbols {
            let quote = by_sec.get(sec.as_str());
            let price = quote
                .and_then(|q| q.adj_close)
                .filter(|p| *p > 0.0)
                .ok_or_else(|| QuantwalkError::MissingLivePrice {
                    sec_code: sec.clone(),
                })?;
            let target_dollars = targets.get(sec).copied().unwrap_or(0.0);
            let target_shares = (target_dollars / price).round();
            let current_shares = holdings.get(sec).copied().unwrap_or(0.0);
            orders.push(LiveOrder {
                sec_code: sec.clone(),
                ticker: quote.map(|q| q.ticker.clone()).unwrap_or_default(),
                price,
                target_dollars,
                target_shares,
                current_shares,
                order_shares: target_shares - current_shares,
            });
        }
        orders.sort_by(|a, b| cmp_sec_codes(&a.sec_code, &b.sec_code));

        info!(
            strategy,
            version,
            %date,
            signals = signals.len(),
            orders = orders.iter().filter(|o| o.order_shares != 0.0).count(),
            "live orders generated"
        );
        Ok(LiveOutcome {
            date,
            signals,
            orders,
            sizes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn quote(sec: &str, close: Option<f64>) -> LiveQuote {
        LiveQuote {
            sec_code: sec.into(),
            ticker: format!("T{sec}"),
            adj_open: close,
            adj_high: close,
            adj_low: close,
            adj_close: close,
            adj_volume: Some(1000.0),
            adj_vwap: close,
        }
    }

    fn history() -> PeriodFrame {
        let mut f = PeriodFrame::new(vec!["AdjClose".into(), "AdjVolume".into(), "AvgDolVol".into()]);
        for (sec, day, close) in [("1", 1, 10.0), ("1", 2, 11.0), ("2", 2, 50.0)] {
            f.push(PeriodRow {
                sec_code: sec.into(),
                date: d(day),
                test_flag: false,
                values: vec![Some(close), Some(300.0), Some(day as f64 * 1e6)],
            });
        }
        f
    }

    #[test]
    fn history_sql_filters_and_orders() {
        let sql = base_history_sql(
            &["AdjClose".into(), "Close".into()],
            &["7".into(), "X1".into()],
            d(1),
            d(20),
        );
        assert!(sql.contains("SecCode IN (7, 'X1')"));
        assert!(sql.contains("Date >= '2024-05-01' AND Date < '2024-05-20'"));
        assert!(sql.contains("AdjClose AS \"AdjClose\""));
        assert!(sql.ends_with("ORDER BY SecCode, Date"));
    }

    #[test]
    fn rescaling_touches_only_listed_securities() {
        let mut f = history();
        rescale_history(
            &mut f,
            &[ScalingFactor {
                sec_code: "1".into(),
                dividend_factor: 0.5,
                split_factor: 2.0,
            }],
        );
        assert_eq!(f.value(0, "AdjClose"), Some(10.0));
        assert_eq!(f.value(0, "AdjVolume"), Some(150.0));
        assert_eq!(f.value(0, "AvgDolVol"), Some(1e6));
        assert_eq!(f.value(2, "AdjClose"), Some(50.0));
        assert_eq!(f.value(2, "AdjVolume"), Some(300.0));
    }

    #[test]
    fn snapshot_row_per_member() {
        let h = history();
        let snap = snapshot_rows(
            &h,
            &[quote("1", Some(12.0)), quote("2", Some(49.0))],
            &["1".into(), "2".into()],
            d(3),
        )
        .unwrap();
        assert_eq!(snap.len(), 2);
        assert!(snap.rows.iter().all(|r| r.test_flag && r.date == d(3)));
        assert_eq!(snap.value(0, "AdjClose"), Some(12.0));
        assert_eq!(snap.value(0, "AdjVolume"), Some(1000.0));
        // carried from the last stored row
        assert_eq!(snap.value(0, "AvgDolVol"), Some(2e6));
    }

    #[test]
    fn raw_and_adjusted_columns_agree_on_the_live_date() {
        let mut h = PeriodFrame::new(vec!["AdjClose".into(), "Close".into(), "Open".into(), "Volume".into()]);
        h.push(PeriodRow {
            sec_code: "1".into(),
            date: d(2),
            test_flag: false,
            values: vec![Some(5.0), Some(20.0), Some(19.0), Some(80.0)],
        });
        let snap = snapshot_rows(&h, &[quote("1", Some(12.0))], &["1".into()], d(3)).unwrap();
        assert_eq!(snap.value(0, "Close"), snap.value(0, "AdjClose"));
        assert_eq!(snap.value(0, "Open"), Some(12.0));
        assert_eq!(snap.value(0, "Volume"), Some(1000.0));
    }

    #[test]
    fn missing_live_price_is_surfaced() {
        let h = history();
        let err = snapshot_rows(
            &h,
            &[quote("1", Some(12.0)), quote("2", None)],
            &["1".into(), "2".into()],
            d(3),
        )
        .unwrap_err();
        assert!(matches!(err, QuantwalkError::MissingLivePrice { ref sec_code } if sec_code == "2"));

        let err = snapshot_rows(&h, &[quote("1", Some(12.0))], &["1".into(), "3".into()], d(3)).unwrap_err();
        assert!(matches!(err, QuantwalkError::MissingLivePrice { .. }));
    }
}
