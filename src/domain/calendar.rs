//! Trading-calendar lookups against the warehouse.

use crate::domain::error::QuantwalkError;
use crate::domain::feature_sql::date_literal;
use crate::ports::query_port::QueryPort;
use chrono::NaiveDate;

pub const CALENDAR_TABLE: &str = "trading_calendar";

/// Nearest calendar date on or before `date`.
pub fn trading_date_on_or_before(
    query: &dyn QueryPort,
    date: NaiveDate,
) -> Result<NaiveDate, QuantwalkError> {
    let sql = format!(
        "SELECT MAX(CalendarDate) AS TradeDate FROM {CALENDAR_TABLE} WHERE CalendarDate <= {}",
        date_literal(date)
    );
    let result = query.execute(&sql)?;
    result
        .scalar()
        .and_then(|v| v.as_date())
        .ok_or(QuantwalkError::NoTradingDate { date })
}

/// Calendar dates in `[start, end]`, ascending.
pub fn trading_dates_between(
    query: &dyn QueryPort,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<NaiveDate>, QuantwalkError> {
    if end < start {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT CalendarDate FROM {CALENDAR_TABLE} WHERE CalendarDate >= {} AND CalendarDate <= {} \
         ORDER BY CalendarDate",
        date_literal(start),
        date_literal(end)
    );
    let result = query.execute(&sql)?;
    Ok(result
        .rows
        .iter()
        .filter_map(|r| r.first().and_then(|v| v.as_date()))
        .collect())
}

pub fn latest_trading_date(query: &dyn QueryPort) -> Result<Option<NaiveDate>, QuantwalkError> {
    let sql = format!("SELECT MAX(CalendarDate) AS TradeDate FROM {CALENDAR_TABLE}");
    let result = query.execute(&sql)?;
    Ok(result.scalar().and_then(|v| v.as_date()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::query_port::{QueryResult, SqlValue};
    use std::cell::RefCell;

    struct Canned {
        result: QueryResult,
        seen: RefCell<Vec<String>>,
    }

    impl QueryPort for Canned {
        fn execute(&self, sql: &str) -> Result<QueryResult, QuantwalkError> {
            self.seen.borrow_mut().push(sql.to_string());
            Ok(self.result.clone())
        }
    }

    fn canned(values: Vec<SqlValue>) -> Canned {
        Canned {
            result: QueryResult {
                columns: vec!["CalendarDate".into()],
                rows: values.into_iter().map(|v| vec![v]).collect(),
            },
            seen: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn prior_trading_date_is_returned() {
        let q = canned(vec![SqlValue::Text("2021-06-30".into())]);
        let date = NaiveDate::from_ymd_opt(2021, 7, 3).unwrap();
        assert_eq!(
            trading_date_on_or_before(&q, date).unwrap(),
            NaiveDate::from_ymd_opt(2021, 6, 30).unwrap()
        );
        assert!(q.seen.borrow()[0].contains("CalendarDate <= '2021-07-03'"));
    }

    #[test]
    fn missing_calendar_is_an_error() {
        let q = canned(vec![SqlValue::Null]);
        let date = NaiveDate::from_ymd_opt(1990, 1, 1).unwrap();
        assert!(matches!(
            trading_date_on_or_before(&q, date),
            Err(QuantwalkError::NoTradingDate { .. })
        ));
    }

    #[test]
    fn reversed_range_skips_query() {
        let q = canned(vec![]);
        let a = NaiveDate::from_ymd_opt(2021, 1, 2).unwrap();
        let b = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        assert!(trading_dates_between(&q, a, b).unwrap().is_empty());
        assert!(q.seen.borrow().is_empty());
    }
}
