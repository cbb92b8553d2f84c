//! # nanobench
//!
//! Load driver for MQTT brokers. Each round opens one connection and runs a
//! pool of logical sessions over it: connect-only, subscribe-and-count or
//! paced publishing under a shared send budget.
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
pub use anyhow;
pub use mqtt_transport;
pub use tokio;
pub use tokio_util;
pub use tracing;

pub mod config;
pub mod counters;
pub mod driver;
pub mod pacing;
pub mod pool;
pub mod report;
pub mod session;
pub mod topic;

pub use config::{Cli, Mode, Workload, WorkloadConfig};
pub use counters::Counters;
pub use driver::{run, run_with};
pub use pool::SessionPool;
pub use report::BenchReport;
pub use session::{SessionContext, SessionError, Shared};
