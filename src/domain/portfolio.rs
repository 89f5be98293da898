//! Daily long/short book: marks, trades and statistics.

use crate::domain::error::QuantwalkError;
use crate::domain::position::Position;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Dollar targets below this are flat.
pub const SIZE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketQuote {
    pub close: Option<f64>,
    pub exec: Option<f64>,
    pub dividend: f64,
    pub split: f64,
}

impl MarketQuote {
    pub fn at(close: f64) -> Self {
        Self {
            close: Some(close),
            exec: Some(close),
            dividend: 0.0,
            split: 1.0,
        }
    }

    fn exec_price(&self) -> Option<f64> {
        self.exec.or(self.close).filter(|p| *p > 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStat {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "PL")]
    pub pl: f64,
    #[serde(rename = "Return")]
    pub ret: f64,
    #[serde(rename = "Turnover")]
    pub turnover: f64,
    #[serde(rename = "LongExposure")]
    pub long_exposure: f64,
    #[serde(rename = "ShortExposure")]
    pub short_exposure: f64,
    #[serde(rename = "OpenPositions")]
    pub open_positions: usize,
    #[serde(rename = "Cost")]
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub booksize: f64,
    pub cost_bps: f64,
    pub positions: BTreeMap<String, Position>,
    marked: Option<NaiveDate>,
    sized: Option<NaiveDate>,
    day_pl: f64,
}

impl Portfolio {
    pub fn new(booksize: f64, cost_bps: f64) -> Self {
        Portfolio {
            booksize,
            cost_bps,
            positions: BTreeMap::new(),
            marked: None,
            sized: None,
            day_pl: 0.0,
        }
    }

    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn shares(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.shares)
    }

    pub fn open_positions(&self) -> usize {
        self.positions.values().filter(|p| p.is_open()).count()
    }

    pub fn last_marked(&self) -> Option<NaiveDate> {
        self.marked
    }

    /// Apply splits, dividends and closes for `date`. Unseen symbols are
    /// created flat.
    pub fn mark_prices(
        &mut self,
        date: NaiveDate,
        quotes: &BTreeMap<String, MarketQuote>,
    ) -> Result<(), QuantwalkError> {
        if self.marked.is_some_and(|m| date <= m) {
            return Err(QuantwalkError::InvalidState {
                reason: format!("prices for {} marked out of order", date),
            });
        }
        self.day_pl = 0.0;
        for (symbol, quote) in quotes {
            let position = self
                .positions
                .entry(symbol.clone())
                .or_insert_with(|| Position::new(symbol));
            if let Some(close) = quote.close {
                self.day_pl += position.mark(close, quote.dividend, quote.split);
            }
        }
        self.marked = Some(date);
        Ok(())
    }

    /// Trade every symbol to its dollar target; symbols absent from
    /// `targets` go flat. Prices for `date` must already be marked.
    pub fn size_positions(
        &mut self,
        date: NaiveDate,
        targets: &BTreeMap<String, f64>,
        quotes: &BTreeMap<String, MarketQuote>,
    ) -> Result<DailyStat, QuantwalkError> {
        if self.marked != Some(date) {
            return Err(QuantwalkError::InvalidState {
                reason: format!("sizing {} before its prices were marked", date),
            });
        }
        if self.sized == Some(date) {
            return Err(QuantwalkError::InvalidState {
                reason: format!("positions for {} already sized", date),
            });
        }

        let symbols: BTreeSet<String> = targets
            .keys()
            .cloned()
            .chain(
                self.positions
                    .values()
                    .filter(|p| p.is_open())
                    .map(|p| p.symbol.clone()),
            )
            .collect();

        let mut traded_notional = 0.0;
        let mut cost = 0.0;
        for symbol in symbols {
            let target = targets.get(&symbol).copied().unwrap_or(0.0);
            let target = if target.abs() < SIZE_EPSILON { 0.0 } else { target };
            let quote = quotes.get(&symbol);
            let position = self
                .positions
                .entry(symbol.clone())
                .or_insert_with(|| Position::new(&symbol));

            let Some(exec) = quote.and_then(|q| q.exec_price()) else {
                if target == 0.0 && position.is_open() {
                    return Err(QuantwalkError::OpenSharesWithoutPrice {
                        symbol,
                        shares: position.shares,
                        date,
                    });
                }
                continue;
            };

            let new_shares = target / exec;
            let traded = new_shares - position.shares;
            if traded.abs() <= crate::domain::position::SHARE_EPSILON {
                continue;
            }
            let notional = traded.abs() * exec;
            traded_notional += notional;
            cost += notional * self.cost_bps / 10_000.0;

            let mark = quote.and_then(|q| q.close).unwrap_or(exec);
            self.day_pl += traded * (mark - exec);
            position.set_shares(new_shares, mark);
        }

        self.day_pl -= cost;
        self.sized = Some(date);
        Ok(self.daily_stat(date, traded_notional, cost))
    }

    /// Liquidate everything at `date`'s prices.
    pub fn close_all(
        &mut self,
        date: NaiveDate,
        quotes: &BTreeMap<String, MarketQuote>,
    ) -> Result<DailyStat, QuantwalkError> {
        self.size_positions(date, &BTreeMap::new(), quotes)
    }

    fn daily_stat(&self, date: NaiveDate, traded_notional: f64, cost: f64) -> DailyStat {
        let mut long_exposure = 0.0;
        let mut short_exposure = 0.0;
        for p in self.positions.values().filter(|p| p.is_open()) {
            let value = p.market_value();
            if value > 0.0 {
                long_exposure += value;
            } else {
                short_exposure += -value;
            }
        }
        let scale = if self.booksize > 0.0 { self.booksize } else { 1.0 };
        DailyStat {
            date,
            pl: self.day_pl,
            ret: self.day_pl / scale,
            turnover: traded_notional / scale,
            long_exposure,
            short_exposure,
            open_positions: self.open_positions(),
            cost,
        }
    }
}
