//! PostgreSQL warehouse adapter.
//!
//! The connection is opened lazily and dropped after any connection-level
//! failure, so the next query reconnects.

use crate::domain::error::QuantwalkError;
use crate::ports::config_port::ConfigPort;
use crate::ports::query_port::{QueryPort, QueryResult, SqlValue};
use chrono::NaiveDate;
use postgres::error::SqlState;
use postgres::types::Type;
use postgres::{Client, NoTls, Row};
use std::cell::RefCell;
use tracing::{debug, warn};

pub struct PostgresAdapter {
    conninfo: String,
    timeout_secs: u64,
    client: RefCell<Option<Client>>,
}

impl PostgresAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantwalkError> {
        let conninfo =
            config
                .get_string("database", "conninfo")
                .ok_or_else(|| QuantwalkError::ConfigMissing {
                    section: "database".into(),
                    key: "conninfo".into(),
                })?;
        let timeout_secs = config.get_int("database", "query_timeout_secs", 1800).max(0) as u64;

        Ok(Self {
            conninfo,
            timeout_secs,
            client: RefCell::new(None),
        })
    }

    fn connect(&self) -> Result<Client, QuantwalkError> {
        let mut client = Client::connect(&self.conninfo, NoTls).map_err(|e| QuantwalkError::Database {
            reason: e.to_string(),
        })?;
        if self.timeout_secs > 0 {
            client
                .batch_execute(&format!("SET statement_timeout = {}", self.timeout_secs * 1000))
                .map_err(|e| QuantwalkError::Database {
                    reason: e.to_string(),
                })?;
        }
        Ok(client)
    }

    fn classify(&self, e: postgres::Error) -> QuantwalkError {
        match e.code() {
            Some(code) if *code == SqlState::QUERY_CANCELED => QuantwalkError::QueryTimeout {
                seconds: self.timeout_secs,
            },
            Some(_) => QuantwalkError::DatabaseQuery {
                reason: e.to_string(),
            },
            None => QuantwalkError::Database {
                reason: e.to_string(),
            },
        }
    }
}

fn cell(row: &Row, i: usize) -> Result<SqlValue, QuantwalkError> {
    let ty = row.columns()[i].type_().clone();
    let err = |e: postgres::Error| QuantwalkError::DatabaseQuery {
        reason: e.to_string(),
    };
    let value = if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(i).map_err(err)?.map(|v| SqlValue::Int(v as i64))
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(i).map_err(err)?.map(|v| SqlValue::Int(v as i64))
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(i).map_err(err)?.map(SqlValue::Int)
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(i).map_err(err)?.map(|v| SqlValue::Real(v as f64))
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(i).map_err(err)?.map(SqlValue::Real)
    } else if ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(i).map_err(err)?.map(|v| SqlValue::Int(v as i64))
    } else if ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(i)
            .map_err(err)?
            .map(|d| SqlValue::Text(d.format("%Y-%m-%d").to_string()))
    } else if ty == Type::TEXT || ty == Type::VARCHAR || ty == Type::BPCHAR || ty == Type::NAME {
        row.try_get::<_, Option<String>>(i).map_err(err)?.map(SqlValue::Text)
    } else {
        return Err(QuantwalkError::DatabaseQuery {
            reason: format!(
                "column '{}' has unsupported type {}; cast it to double precision",
                row.columns()[i].name(),
                ty
            ),
        });
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

impl QueryPort for PostgresAdapter {
    fn execute(&self, sql: &str) -> Result<QueryResult, QuantwalkError> {
        let mut slot = self.client.borrow_mut();
        if slot.is_none() {
            debug!("opening postgres connection");
            *slot = Some(self.connect()?);
        }
        let Some(client) = slot.as_mut() else {
            return Err(QuantwalkError::Database {
                reason: "no connection".into(),
            });
        };

        let statement = match client.prepare(sql) {
            Ok(s) => s,
            Err(e) => {
                let err = self.classify(e);
                if err.is_transient() {
                    *slot = None;
                }
                return Err(err);
            }
        };
        let columns: Vec<String> = statement.columns().iter().map(|c| c.name().to_string()).collect();

        let rows = match client.query(&statement, &[]) {
            Ok(rows) => rows,
            Err(e) => {
                let err = self.classify(e);
                if matches!(err, QuantwalkError::Database { .. }) {
                    warn!(error = %err, "dropping postgres connection");
                    *slot = None;
                }
                return Err(err);
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(cell(row, i)?);
            }
            out.push(values);
        }
        Ok(QueryResult { columns, rows: out })
    }
}
