//! Portfolio construction state machine.
//!
//! One instance per hyperparameter column. Each test date is marked, scored,
//! sized through the rolling [`SizeContainer`], and the last date of a period
//! force-closes the book.

use crate::domain::error::QuantwalkError;
use crate::domain::period::PeriodFrame;
use crate::domain::portfolio::{DailyStat, MarketQuote, Portfolio};
use crate::domain::ranking::pct_rank;
use crate::domain::signal::Signal;
use crate::domain::size_container::SizeContainer;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Which end of a score variable is preferred when picking within a half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreDirection {
    /// Longs take the lowest scores, shorts the highest.
    #[default]
    LowerIsBetter,
    HigherIsBetter,
}

impl ScoreDirection {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "lower_is_better" | "lower" | "ascending" => Some(ScoreDirection::LowerIsBetter),
            "higher_is_better" | "higher" | "descending" => Some(ScoreDirection::HigherIsBetter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorParams {
    pub booksize: f64,
    pub per_side_count: usize,
    pub holding_period: usize,
    pub score_column: Option<String>,
    pub score_direction: ScoreDirection,
    pub close_column: String,
    pub exec_column: String,
    pub dividend_column: String,
    pub split_column: String,
    pub cost_bps: f64,
}

impl Default for ConstructorParams {
    fn default() -> Self {
        Self {
            booksize: 1_000_000.0,
            per_side_count: 10,
            holding_period: 5,
            score_column: None,
            score_direction: ScoreDirection::LowerIsBetter,
            close_column: "RClose".into(),
            exec_column: "RClose".into(),
            dividend_column: "Dividend".into(),
            split_column: "SplitFactor".into(),
            cost_bps: 0.0,
        }
    }
}

impl ConstructorParams {
    /// Dollar increment per selection per day.
    pub fn increment(&self) -> f64 {
        self.booksize / (2.0 * self.per_side_count.max(1) as f64 * self.holding_period.max(1) as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructorState {
    Initialized,
    PricesMarked(NaiveDate),
    Sized(NaiveDate),
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub longs: Vec<String>,
    pub shorts: Vec<String>,
}

/// Split the cross-section at the median signal rank and pick
/// `per_side_count` names per side.
pub fn select_positions(
    signals: &[(String, f64)],
    scores: &HashMap<String, f64>,
    params: &ConstructorParams,
) -> Selection {
    let values: Vec<Option<f64>> = signals.iter().map(|(_, v)| Some(*v)).collect();
    let ranks = pct_rank(&values);

    let mut longs: Vec<(&str, f64)> = Vec::new();
    let mut shorts: Vec<(&str, f64)> = Vec::new();
    for ((symbol, value), rank) in signals.iter().zip(ranks) {
        match rank {
            Some(r) if r > 0.5 => longs.push((symbol.as_str(), *value)),
            Some(_) => shorts.push((symbol.as_str(), *value)),
            None => {}
        }
    }

    let score_of = |s: &str| scores.get(s).copied();
    let by_score = |a: &(&str, f64), b: &(&str, f64), ascending: bool| -> Ordering {
        match (score_of(a.0), score_of(b.0)) {
            (Some(x), Some(y)) => {
                if ascending {
                    x.total_cmp(&y)
                } else {
                    y.total_cmp(&x)
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    };

    match (&params.score_column, params.score_direction) {
        (Some(_), direction) => {
            let longs_ascending = direction == ScoreDirection::LowerIsBetter;
            longs.sort_by(|a, b| by_score(a, b, longs_ascending).then(b.1.total_cmp(&a.1)));
            shorts.sort_by(|a, b| by_score(a, b, !longs_ascending).then(a.1.total_cmp(&b.1)));
        }
        (None, _) => {
            longs.sort_by(|a, b| b.1.total_cmp(&a.1));
            shorts.sort_by(|a, b| a.1.total_cmp(&b.1));
        }
    }

    let n = params.per_side_count;
    Selection {
        longs: longs.into_iter().take(n).map(|(s, _)| s.to_string()).collect(),
        shorts: shorts.into_iter().take(n).map(|(s, _)| s.to_string()).collect(),
    }
}

/// Test-date quotes from a period frame.
pub fn period_quotes(
    frame: &PeriodFrame,
    params: &ConstructorParams,
) -> Result<BTreeMap<NaiveDate, BTreeMap<String, MarketQuote>>, QuantwalkError> {
    let close_idx = frame
        .column_index(&params.close_column)
        .ok_or_else(|| QuantwalkError::InvalidState {
            reason: format!("close column '{}' is not in the period data", params.close_column),
        })?;
    let exec_idx = frame.column_index(&params.exec_column);
    let dividend_idx = frame.column_index(&params.dividend_column);
    let split_idx = frame.column_index(&params.split_column);

    let mut out: BTreeMap<NaiveDate, BTreeMap<String, MarketQuote>> = BTreeMap::new();
    for row in frame.rows.iter().filter(|r| r.test_flag) {
        let get = |idx: Option<usize>| idx.and_then(|i| row.values.get(i).copied().flatten());
        let close = get(Some(close_idx));
        let quote = MarketQuote {
            close,
            exec: get(exec_idx).or(close),
            dividend: get(dividend_idx).unwrap_or(0.0),
            split: get(split_idx).filter(|s| *s > 0.0).unwrap_or(1.0),
        };
        out.entry(row.date).or_default().insert(row.sec_code.clone(), quote);
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct PortfolioConstructor {
    params: ConstructorParams,
    sizes: SizeContainer,
    portfolio: Portfolio,
    state: ConstructorState,
}

impl PortfolioConstructor {
    pub fn new(params: ConstructorParams) -> Self {
        let sizes = SizeContainer::new(params.holding_period);
        let portfolio = Portfolio::new(params.booksize, params.cost_bps);
        Self {
            params,
            sizes,
            portfolio,
            state: ConstructorState::Initialized,
        }
    }

    pub fn params(&self) -> &ConstructorParams {
        &self.params
    }

    pub fn state(&self) -> ConstructorState {
        self.state
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn sizes(&self) -> &SizeContainer {
        &self.sizes
    }

    /// Advance one trading date.
    pub fn step(
        &mut self,
        date: NaiveDate,
        quotes: &BTreeMap<String, MarketQuote>,
        signals: &[(String, f64)],
        scores: &HashMap<String, f64>,
        is_final: bool,
    ) -> Result<DailyStat, QuantwalkError> {
        if self.state == ConstructorState::Closed {
            return Err(QuantwalkError::InvalidState {
                reason: format!("constructor closed; cannot trade {}", date),
            });
        }
        self.portfolio.mark_prices(date, quotes)?;
        self.state = ConstructorState::PricesMarked(date);

        if is_final {
            let stat = self.portfolio.close_all(date, quotes)?;
            self.sizes.clear();
            self.state = ConstructorState::Closed;
            return Ok(stat);
        }

        let selection = select_positions(signals, scores, &self.params);
        let increment = self.params.increment();
        let mut increments: BTreeMap<String, f64> = BTreeMap::new();
        for symbol in &selection.longs {
            *increments.entry(symbol.clone()).or_insert(0.0) += increment;
        }
        for symbol in &selection.shorts {
            *increments.entry(symbol.clone()).or_insert(0.0) -= increment;
        }
        debug!(%date, longs = selection.longs.len(), shorts = selection.shorts.len(), "selected");

        self.sizes.update_sizes(date, increments);
        let stat = self
            .portfolio
            .size_positions(date, &self.sizes.get_sizes(), quotes)?;
        self.state = ConstructorState::Sized(date);
        Ok(stat)
    }

    /// Simulate every test date of `frame`, closing the book on the last one.
    pub fn run_period(
        &mut self,
        frame: &PeriodFrame,
        signals: &[Signal],
    ) -> Result<Vec<DailyStat>, QuantwalkError> {
        if self.state == ConstructorState::Closed {
            self.state = ConstructorState::Initialized;
        }
        let quotes = period_quotes(frame, &self.params)?;

        let mut by_date: HashMap<NaiveDate, Vec<(String, f64)>> = HashMap::new();
        for s in signals {
            by_date.entry(s.date).or_default().push((s.sec_code.clone(), s.value));
        }

        let score_idx = self
            .params
            .score_column
            .as_ref()
            .and_then(|c| frame.column_index(c));
        let mut scores_by_date: HashMap<NaiveDate, HashMap<String, f64>> = HashMap::new();
        if let Some(idx) = score_idx {
            for row in frame.rows.iter().filter(|r| r.test_flag) {
                if let Some(v) = row.values.get(idx).copied().flatten() {
                    scores_by_date
                        .entry(row.date)
                        .or_default()
                        .insert(row.sec_code.clone(), v);
                }
            }
        }

        let empty_signals = Vec::new();
        let empty_scores = HashMap::new();
        let last = quotes.keys().next_back().copied();
        let mut stats = Vec::with_capacity(quotes.len());
        for (date, day_quotes) in &quotes {
            let stat = self.step(
                *date,
                day_quotes,
                by_date.get(date).unwrap_or(&empty_signals),
                scores_by_date.get(date).unwrap_or(&empty_scores),
                Some(*date) == last,
            )?;
            stats.push(stat);
        }
        Ok(stats)
    }
}
