//! Warehouse query port.
//!
//! The warehouse is reached only through `execute(sql) -> rows`; dialect
//! differences are handled when the SQL is generated, not here.

use crate::domain::error::QuantwalkError;
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Null => None,
            SqlValue::Int(v) => Some(*v as f64),
            SqlValue::Real(v) if v.is_finite() => Some(*v),
            SqlValue::Real(_) => None,
            SqlValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    /// Identifiers are carried as strings downstream; integral reals print
    /// without a fractional part.
    pub fn as_string(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::Real(v) if v.fract() == 0.0 && v.is_finite() => Some(format!("{}", *v as i64)),
            SqlValue::Real(v) => Some(v.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
        }
    }

    /// Accepts `YYYY-MM-DD`, optionally followed by a time component.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            SqlValue::Text(s) => {
                let head = s.get(..10).unwrap_or(s);
                NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl QueryResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn require_column(&self, name: &str) -> Result<usize, QuantwalkError> {
        self.column_index(name)
            .ok_or_else(|| QuantwalkError::DatabaseQuery {
                reason: format!("result set has no column '{}'", name),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.rows.first().and_then(|r| r.first())
    }
}

pub trait QueryPort {
    fn execute(&self, sql: &str) -> Result<QueryResult, QuantwalkError>;
}

impl<T: QueryPort + ?Sized> QueryPort for &T {
    fn execute(&self, sql: &str) -> Result<QueryResult, QuantwalkError> {
        (**self).execute(sql)
    }
}

impl<T: QueryPort + ?Sized> QueryPort for Box<T> {
    fn execute(&self, sql: &str) -> Result<QueryResult, QuantwalkError> {
        (**self).execute(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercions() {
        assert_eq!(SqlValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(SqlValue::Text(" 2.5 ".into()).as_f64(), Some(2.5));
        assert_eq!(SqlValue::Real(f64::NAN).as_f64(), None);
        assert_eq!(SqlValue::Null.as_f64(), None);
    }

    #[test]
    fn identifier_rendering() {
        assert_eq!(SqlValue::Int(1001).as_string().as_deref(), Some("1001"));
        assert_eq!(SqlValue::Real(1001.0).as_string().as_deref(), Some("1001"));
        assert_eq!(SqlValue::Text("AAPL".into()).as_string().as_deref(), Some("AAPL"));
    }

    #[test]
    fn dates_with_time_suffix() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 4);
        assert_eq!(SqlValue::Text("2021-03-04".into()).as_date(), expected);
        assert_eq!(SqlValue::Text("2021-03-04 00:00:00".into()).as_date(), expected);
        assert_eq!(SqlValue::Int(20210304).as_date(), None);
    }

    #[test]
    fn column_lookup_is_case_insensitive() {
        let result = QueryResult {
            columns: vec!["SecCode".into(), "Date".into()],
            rows: vec![],
        };
        assert_eq!(result.column_index("seccode"), Some(0));
        assert!(result.require_column("Close").is_err());
    }
}
