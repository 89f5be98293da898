//! Query decorator adding the maintenance blackout window and retries.

use crate::domain::error::QuantwalkError;
use crate::domain::retry::RetryPolicy;
use crate::domain::settings::DatabaseConfig;
use crate::ports::query_port::{QueryPort, QueryResult};
use chrono::{Local, NaiveTime};
use std::time::Duration;

type Clock = Box<dyn Fn() -> NaiveTime + Send + Sync>;

pub struct GuardedQuery<Q> {
    inner: Q,
    blackout: Option<(NaiveTime, NaiveTime)>,
    retry: RetryPolicy,
    clock: Clock,
}

/// Whether `now` falls in `[start, end)`; windows may wrap midnight.
pub fn in_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

impl<Q: QueryPort> GuardedQuery<Q> {
    pub fn new(inner: Q, blackout: Option<(NaiveTime, NaiveTime)>, retry: RetryPolicy) -> Self {
        Self {
            inner,
            blackout,
            retry,
            clock: Box::new(|| Local::now().time()),
        }
    }

    pub fn from_config(inner: Q, config: &DatabaseConfig) -> Self {
        Self::new(inner, config.blackout, RetryPolicy::new(config.max_retries))
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveTime + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.retry = self.retry.with_backoff(backoff);
        self
    }

    pub fn inner(&self) -> &Q {
        &self.inner
    }

    fn check_window(&self) -> Result<(), QuantwalkError> {
        if let Some((start, end)) = self.blackout {
            let now = (self.clock)();
            if in_window(now, start, end) {
                return Err(QuantwalkError::QueryBlackout { now, start, end });
            }
        }
        Ok(())
    }
}

impl<Q: QueryPort> QueryPort for GuardedQuery<Q> {
    fn execute(&self, sql: &str) -> Result<QueryResult, QuantwalkError> {
        self.retry.run(|| {
            self.check_window()?;
            self.inner.execute(sql)
        })
    }
}
