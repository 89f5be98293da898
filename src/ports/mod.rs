pub mod config_port;
pub mod live_feed_port;
pub mod period_store;
pub mod query_port;
pub mod results_port;
