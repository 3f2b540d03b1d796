//! Metrics collection modules for system performance monitoring.

pub mod cpu;
pub mod logs;
pub mod memory;
pub mod network;
pub mod overview;
pub mod storage;

pub use cpu::{CpuCollector, CpuMetrics, LoadAverage};
pub use logs::{LogCollector, LogEntry, LogLevel, LogMetrics};
pub use memory::{MemoryCollector, MemoryMetrics};
pub use network::{NetworkCollector, NetworkMetrics};
pub use overview::{OverviewProbe, SystemOverview};
pub use storage::{StorageCollector, StorageMetrics};

/// Clamps a percentage to [0, 100]. NaN maps to 0.
pub(crate) fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Rate of `delta` over `elapsed_secs`; 0 when no time has passed.
pub(crate) fn per_second(delta: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        delta as f64 / elapsed_secs
    } else {
        0.0
    }
}
