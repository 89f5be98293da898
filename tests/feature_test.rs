//! Compiled feature SQL against the in-memory evaluator on a seeded SQLite
//! warehouse.

#![cfg(feature = "sqlite")]

mod common;

use chrono::{Duration, NaiveDate};
use common::*;
use quantwalk::adapters::sqlite_adapter::SqliteAdapter;
use quantwalk::domain::data_constructor::frame_from_result;
use quantwalk::domain::feature::{FeatureDescriptor, parse_feature_list};
use quantwalk::domain::feature_eval::evaluate;
use quantwalk::domain::feature_sql::{FeatureCompiler, LOOKBACK_BUFFER_DAYS, SqlDialect};
use quantwalk::domain::live::base_history_sql;
use quantwalk::domain::period::PeriodFrame;
use quantwalk::ports::query_port::QueryPort;
use std::collections::BTreeSet;

const PARITY_FEATURES: [&str; 12] = [
    "AdjClose",
    "RClose",
    "MA5_AdjClose",
    "PRMA10_RClose",
    "VOL20_AdjClose",
    "BOLL20_AdjClose",
    "LAG2_MA5_AdjClose",
    "LEAD3_AdjClose",
    "LAG1_VOL10_AdjClose",
    "RANK4_PRMA10_AdjClose",
    "RANK3_AdjClose",
    "MA3_MarketCap",
];

fn sec_codes() -> Vec<String> {
    SECURITIES.iter().map(|(s, _, _)| s.to_string()).collect()
}

fn compiled(
    db: &SqliteAdapter,
    features: &[FeatureDescriptor],
    start: NaiveDate,
    end: NaiveDate,
    live: bool,
) -> PeriodFrame {
    let sql = FeatureCompiler::new(SqlDialect::Sqlite).compile(features, &sec_codes(), start, end, live);
    frame_from_result(&db.execute(&sql).unwrap(), end).unwrap()
}

/// Same window as the compiled query, evaluated in memory.
fn evaluated(
    db: &SqliteAdapter,
    features: &[FeatureDescriptor],
    start: NaiveDate,
    end: NaiveDate,
    live: bool,
) -> PeriodFrame {
    let columns: Vec<String> = features
        .iter()
        .map(|d| d.base.column_name())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let sql = base_history_sql(
        &columns,
        &sec_codes(),
        start - Duration::days(LOOKBACK_BUFFER_DAYS),
        end + Duration::days(1),
    );
    let history = frame_from_result(&db.execute(&sql).unwrap(), end).unwrap();
    evaluate(features, &history, live)
        .unwrap()
        .filter(|r| r.date >= start && r.date <= end)
}

fn assert_frames_match(sql: &PeriodFrame, mem: &PeriodFrame) {
    assert_eq!(sql.columns, mem.columns);
    assert_eq!(sql.len(), mem.len());
    for (a, b) in sql.rows.iter().zip(&mem.rows) {
        assert_eq!((a.sec_code.as_str(), a.date), (b.sec_code.as_str(), b.date));
    }
    for column in &sql.columns {
        let left = sql.column(column).unwrap();
        let right = mem.column(column).unwrap();
        for (i, (x, y)) in left.iter().zip(&right).enumerate() {
            match (x, y) {
                (Some(x), Some(y)) => approx::assert_relative_eq!(*x, *y, epsilon = 1e-7, max_relative = 1e-7),
                (None, None) => {}
                _ => panic!(
                    "{column} differs at {} {}: {x:?} vs {y:?}",
                    sql.rows[i].sec_code, sql.rows[i].date
                ),
            }
        }
    }
}

#[test]
fn compiled_sql_matches_in_memory_evaluation() {
    let db = seeded_warehouse();
    let features = parse_feature_list(&PARITY_FEATURES).unwrap();
    let (start, end) = (date(2019, 7, 1), date(2019, 9, 30));

    let sql = compiled(&db, &features, start, end, false);
    let mem = evaluated(&db, &features, start, end, false);

    assert!(!sql.is_empty());
    assert_frames_match(&sql, &mem);
}

#[test]
fn live_mode_nulls_forward_looking_features_in_both_paths() {
    let db = seeded_warehouse();
    let features = parse_feature_list(&PARITY_FEATURES).unwrap();
    let (start, end) = (date(2020, 6, 1), date(2020, 6, 30));

    let sql = compiled(&db, &features, start, end, true);
    let mem = evaluated(&db, &features, start, end, true);

    assert!(sql.column("LEAD3_AdjClose").unwrap().iter().all(Option::is_none));
    assert_frames_match(&sql, &mem);
}

#[test]
fn lookback_buffer_fills_windows_on_the_first_date() {
    let db = seeded_warehouse();
    let features = parse_feature_list(&["MA5_AdjClose", "VOL20_AdjClose", "LAG2_AdjClose"]).unwrap();
    let start = date(2019, 1, 2);

    let frame = compiled(&db, &features, start, date(2019, 1, 31), false);
    assert_eq!(frame.dates().first().copied(), Some(start));
    for column in ["MA5_AdjClose", "VOL20_AdjClose", "LAG2_AdjClose"] {
        assert!(frame.column(column).unwrap().iter().all(Option::is_some), "{column}");
    }
}

#[test]
fn rank_buckets_partition_each_date() {
    let db = seeded_warehouse();
    let features = parse_feature_list(&["RANK3_AdjClose"]).unwrap();
    let (start, end) = (date(2020, 3, 2), date(2020, 3, 6));
    let frame = compiled(&db, &features, start, end, false);

    for day in frame.dates() {
        let mut buckets: Vec<f64> = frame
            .rows
            .iter()
            .filter(|r| r.date == day)
            .filter_map(|r| r.values[frame.column_index("RANK3_AdjClose").unwrap()])
            .collect();
        buckets.sort_by(f64::total_cmp);
        // six securities into three buckets of two
        assert_eq!(buckets, vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0], "{day}");
    }
}

#[test]
fn any_feature_subset_compiles_and_matches() {
    use proptest::prelude::*;

    let db = seeded_warehouse();
    let pool: Vec<&str> = PARITY_FEATURES.to_vec();
    proptest!(ProptestConfig::with_cases(16), |(picked in proptest::sample::subsequence(pool.clone(), 1..=4))| {
        let features = parse_feature_list(picked.as_slice()).unwrap();
        let (start, end) = (date(2020, 2, 3), date(2020, 2, 28));
        let sql = compiled(&db, &features, start, end, false);
        let mem = evaluated(&db, &features, start, end, false);
        for d in &features {
            prop_assert!(sql.columns.contains(&d.mnemonic));
        }
        assert_frames_match(&sql, &mem);
    });
}
