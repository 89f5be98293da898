//! Core domain types and logic.

pub mod calendar;
pub mod constructor;
pub mod container;
pub mod data_constructor;
pub mod date_iterator;
pub mod earnings;
pub mod error;
pub mod feature;
pub mod feature_eval;
pub mod feature_sql;
pub mod live;
pub mod metrics;
pub mod model;
pub mod period;
pub mod portfolio;
pub mod position;
pub mod ranking;
pub mod retry;
pub mod settings;
pub mod signal;
pub mod simulation;
pub mod size_container;
pub mod universe;
pub mod version;
