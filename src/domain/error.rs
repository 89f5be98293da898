//! Domain error types.

use chrono::{NaiveDate, NaiveTime};

/// A feature mnemonic that could not be decomposed, with the byte offset of
/// the offending token.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot parse feature '{mnemonic}' at position {position}: {message}")]
pub struct FeatureParseError {
    pub mnemonic: String,
    pub message: String,
    pub position: usize,
}

impl FeatureParseError {
    /// Format the error with a caret pointing at the offending token.
    pub fn display_with_context(&self) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = self.mnemonic,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for quantwalk.
#[derive(Debug, thiserror::Error)]
pub enum QuantwalkError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("query timed out after {seconds}s")]
    QueryTimeout { seconds: u64 },

    #[error("queries are blocked between {start} and {end} (now {now})")]
    QueryBlackout {
        now: NaiveTime,
        start: NaiveTime,
        end: NaiveTime,
    },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    FeatureParse(#[from] FeatureParseError),

    #[error("duplicate row for SecCode {sec_code} on {date}")]
    DuplicateRows { sec_code: String, date: NaiveDate },

    #[error("no trading date on or before {date}")]
    NoTradingDate { date: NaiveDate },

    #[error("empty universe for filter date {filter_date}")]
    EmptyUniverse { filter_date: NaiveDate },

    #[error("{symbol} still has {shares} open shares with no pricing on {date}")]
    OpenSharesWithoutPrice {
        symbol: String,
        shares: f64,
        date: NaiveDate,
    },

    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("version {version} not found for strategy {strategy}")]
    VersionNotFound { strategy: String, version: String },

    #[error("metadata error: {reason}")]
    Metadata { reason: String },

    #[error("period file error: {reason}")]
    PeriodFile { reason: String },

    #[error("model error: {reason}")]
    Model { reason: String },

    #[error("missing live price for SecCode {sec_code}")]
    MissingLivePrice { sec_code: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl QuantwalkError {
    /// Connectivity failures and timeouts; the in-flight query may be retried
    /// on a fresh connection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QuantwalkError::Database { .. } | QuantwalkError::QueryTimeout { .. }
        )
    }

    pub fn is_blackout(&self) -> bool {
        matches!(self, QuantwalkError::QueryBlackout { .. })
    }
}

impl From<&QuantwalkError> for std::process::ExitCode {
    fn from(err: &QuantwalkError) -> Self {
        let code: u8 = match err {
            QuantwalkError::Io(_) | QuantwalkError::Csv(_) | QuantwalkError::Json(_) => 1,
            QuantwalkError::ConfigParse { .. }
            | QuantwalkError::ConfigMissing { .. }
            | QuantwalkError::ConfigInvalid { .. } => 2,
            QuantwalkError::Database { .. }
            | QuantwalkError::DatabaseQuery { .. }
            | QuantwalkError::QueryTimeout { .. } => 3,
            QuantwalkError::QueryBlackout { .. } => 4,
            QuantwalkError::FeatureParse(_) => 5,
            QuantwalkError::DuplicateRows { .. }
            | QuantwalkError::NoTradingDate { .. }
            | QuantwalkError::EmptyUniverse { .. }
            | QuantwalkError::PeriodFile { .. } => 6,
            QuantwalkError::VersionNotFound { .. } | QuantwalkError::Metadata { .. } => 7,
            QuantwalkError::OpenSharesWithoutPrice { .. }
            | QuantwalkError::InvalidState { .. }
            | QuantwalkError::Model { .. } => 8,
            QuantwalkError::MissingLivePrice { .. } => 9,
        };
        std::process::ExitCode::from(code)
    }
}
