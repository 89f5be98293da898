//! Concrete adapter implementations for ports.

pub mod csv_live_feed;
pub mod csv_period_store;
pub mod csv_results_adapter;
pub mod file_config_adapter;
pub mod guarded_query;
#[cfg(feature = "postgres")]
pub mod postgres_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
