//! ltop - a Linux system monitor built on /proc and /sys.
//!
//! Collectors for CPU, memory, processes, storage, network and system logs
//! share a pluggable [`access::FileSystem`], a [`monitor::Monitor`] combines
//! them into periodic [`snapshot::Snapshot`]s, and [`control`] sends signals
//! and adjusts priorities.

pub mod access;
pub mod config;
pub mod control;
pub mod error;
pub mod format;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod process;
pub mod snapshot;

pub use error::{AccessError, CollectError};
pub use monitor::{Monitor, MonitorHandle};
pub use snapshot::Snapshot;
