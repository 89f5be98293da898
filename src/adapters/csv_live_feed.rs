//! Live snapshots, scaling multipliers and holdings from CSV exports.

use crate::domain::error::QuantwalkError;
use crate::ports::live_feed_port::{LiveFeedPort, LiveQuote, ScalingFactor};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct CsvLiveFeed {
    prices_path: PathBuf,
    scaling_path: PathBuf,
    positions_path: Option<PathBuf>,
}

#[derive(Deserialize)]
struct HoldingRow {
    #[serde(rename = "SecCode")]
    sec_code: String,
    #[serde(rename = "Shares")]
    shares: f64,
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, QuantwalkError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| QuantwalkError::PeriodFile {
            reason: format!("{}: {}", path.display(), e),
        })?;
    let mut rows = Vec::new();
    for row in rdr.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

impl CsvLiveFeed {
    pub fn new(prices_path: PathBuf, scaling_path: PathBuf, positions_path: Option<PathBuf>) -> Self {
        Self {
            prices_path,
            scaling_path,
            positions_path,
        }
    }
}

impl LiveFeedPort for CsvLiveFeed {
    fn snapshot(&self) -> Result<Vec<LiveQuote>, QuantwalkError> {
        read_rows(&self.prices_path)
    }

    fn scaling(&self) -> Result<Vec<ScalingFactor>, QuantwalkError> {
        read_rows(&self.scaling_path)
    }

    fn holdings(&self) -> Result<BTreeMap<String, f64>, QuantwalkError> {
        let Some(path) = &self.positions_path else {
            return Ok(BTreeMap::new());
        };
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let mut out = BTreeMap::new();
        for row in read_rows::<HoldingRow>(path)? {
            *out.entry(row.sec_code).or_insert(0.0) += row.shares;
        }
        Ok(out)
    }
}
