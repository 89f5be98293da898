//! Caller-side retry for transient database failures.

use crate::domain::error::QuantwalkError;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `op`, retrying while it fails with a transient error. Blackout and
    /// every other error are returned immediately.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, QuantwalkError>
    where
        F: FnMut() -> Result<T, QuantwalkError>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(attempt, max = self.max_attempts, error = %e, "transient failure, retrying");
                    if !self.backoff.is_zero() {
                        std::thread::sleep(self.backoff * attempt);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
