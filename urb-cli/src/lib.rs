//! URB CLI Library
//!
//! Shared functionality for the process-launch harness: host and run
//! configuration files, the delivery event log, signal handling and
//! statistics display.

pub mod config;
pub mod event_log;
pub mod signal;
pub mod stats;

pub use config::{ConfigError, Host, Hosts, RunConfig, Tuning};
pub use event_log::EventLog;
pub use stats::display_link_stats;
