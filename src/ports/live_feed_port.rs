//! Live pricing boundary.

use crate::domain::error::QuantwalkError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Intraday snapshot for one security, already on the adjusted basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveQuote {
    #[serde(rename = "SecCode")]
    pub sec_code: String,
    #[serde(rename = "Ticker")]
    pub ticker: String,
    #[serde(rename = "AdjOpen")]
    pub adj_open: Option<f64>,
    #[serde(rename = "AdjHigh")]
    pub adj_high: Option<f64>,
    #[serde(rename = "AdjLow")]
    pub adj_low: Option<f64>,
    #[serde(rename = "AdjClose")]
    pub adj_close: Option<f64>,
    #[serde(rename = "AdjVolume")]
    pub adj_volume: Option<f64>,
    #[serde(rename = "AdjVwap")]
    pub adj_vwap: Option<f64>,
}

/// Multipliers that bring stored history onto today's adjustment basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingFactor {
    #[serde(rename = "SecCode")]
    pub sec_code: String,
    #[serde(rename = "DividendFactor")]
    pub dividend_factor: f64,
    #[serde(rename = "SplitFactor")]
    pub split_factor: f64,
}

pub trait LiveFeedPort {
    fn snapshot(&self) -> Result<Vec<LiveQuote>, QuantwalkError>;

    fn scaling(&self) -> Result<Vec<ScalingFactor>, QuantwalkError>;

    /// Current holdings in shares by SecCode.
    fn holdings(&self) -> Result<BTreeMap<String, f64>, QuantwalkError>;
}
