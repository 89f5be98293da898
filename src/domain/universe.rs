//! Universe filter resolution.
//!
//! A universe is the top N securities by a ranking column among those active
//! and liquid on the filter date, reduced to one SecCode per issuer.

use crate::domain::calendar::trading_date_on_or_before;
use crate::domain::error::QuantwalkError;
use crate::domain::feature_sql::{date_literal, PRICE_TABLE};
use crate::domain::period::cmp_sec_codes;
use crate::ports::query_port::QueryPort;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::info;

pub const SECURITY_MASTER_TABLE: &str = "security_master";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseArgs {
    /// SQL predicate over the pricing and security-master columns.
    pub filter_where: String,
    pub rank_column: String,
    pub size: usize,
}

impl Default for UniverseArgs {
    fn default() -> Self {
        Self {
            filter_where: "1 = 1".into(),
            rank_column: "AvgDolVol".into(),
            size: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub sec_code: String,
    pub issuer_id: String,
    pub rank_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUniverse {
    pub filter_date: NaiveDate,
    pub trade_date: NaiveDate,
    pub sec_codes: Vec<String>,
}

/// Higher rank value first, then higher SecCode.
fn by_rank_desc(a: &Candidate, b: &Candidate) -> Ordering {
    b.rank_value
        .partial_cmp(&a.rank_value)
        .unwrap_or(Ordering::Equal)
        .then_with(|| cmp_sec_codes(&b.sec_code, &a.sec_code))
}

/// Keep the best-ranked SecCode per issuer, then the top `n` overall.
pub fn select_top_per_issuer(candidates: Vec<Candidate>, n: usize) -> Vec<String> {
    let mut best: HashMap<String, Candidate> = HashMap::new();
    for c in candidates {
        match best.get(&c.issuer_id) {
            Some(current) if by_rank_desc(current, &c) != Ordering::Greater => {}
            _ => {
                best.insert(c.issuer_id.clone(), c);
            }
        }
    }
    let mut chosen: Vec<Candidate> = best.into_values().collect();
    chosen.sort_by(by_rank_desc);
    chosen.into_iter().take(n).map(|c| c.sec_code).collect()
}

pub fn snapshot_sql(args: &UniverseArgs, trade_date: NaiveDate) -> String {
    let d = date_literal(trade_date);
    let predicate = if args.filter_where.trim().is_empty() {
        "1 = 1"
    } else {
        args.filter_where.trim()
    };
    format!(
        "SELECT p.SecCode AS SecCode, m.IssuerId AS IssuerId, p.{rank} AS RankValue\n\
         FROM {PRICE_TABLE} p\n\
         JOIN {SECURITY_MASTER_TABLE} m ON m.SecCode = p.SecCode\n\
         WHERE p.Date = {d}\n  \
         AND m.StartDate <= {d} AND (m.EndDate IS NULL OR m.EndDate >= {d})\n  \
         AND p.NormalTradingFlag = 1 AND p.OneYearTradingFlag = 1\n  \
         AND p.{rank} IS NOT NULL\n  \
         AND ({predicate})",
        rank = args.rank_column,
    )
}

pub fn resolve_universe(
    query: &dyn QueryPort,
    args: &UniverseArgs,
    filter_date: NaiveDate,
) -> Result<ResolvedUniverse, QuantwalkError> {
    let trade_date = trading_date_on_or_before(query, filter_date)?;
    if trade_date != filter_date {
        info!(
            %filter_date,
            %trade_date,
            "filter date is not a trading date; using prior trading date"
        );
    }

    let result = query.execute(&snapshot_sql(args, trade_date))?;
    let sec_idx = result.require_column("SecCode")?;
    let issuer_idx = result.require_column("IssuerId")?;
    let rank_idx = result.require_column("RankValue")?;

    let candidates: Vec<Candidate> = result
        .rows
        .iter()
        .filter_map(|row| {
            Some(Candidate {
                sec_code: row.get(sec_idx)?.as_string()?,
                issuer_id: row.get(issuer_idx)?.as_string()?,
                rank_value: row.get(rank_idx)?.as_f64()?,
            })
        })
        .collect();

    let sec_codes = select_top_per_issuer(candidates, args.size);
    info!(%trade_date, count = sec_codes.len(), "resolved universe");

    Ok(ResolvedUniverse {
        filter_date,
        trade_date,
        sec_codes,
    })
}
