//! The immutable per-cycle aggregate published by the monitor.

use crate::metrics::{
    CpuMetrics, LogMetrics, MemoryMetrics, NetworkMetrics, StorageMetrics, SystemOverview,
};
use crate::process::ProcessMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain a collector error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Cpu,
    Memory,
    Processes,
    Storage,
    Network,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Cpu => "cpu",
            Section::Memory => "memory",
            Section::Processes => "processes",
            Section::Storage => "storage",
            Section::Network => "network",
        };
        f.pad(name)
    }
}

/// A section that fell back to its default value this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionError {
    pub section: Section,
    pub message: String,
}

/// Everything observed during one collection cycle.
///
/// `timestamp` is taken after the last collector returns, so it is never
/// earlier than any value inside.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub overview: SystemOverview,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub processes: ProcessMetrics,
    pub storage: StorageMetrics,
    pub network: NetworkMetrics,
    pub logs: LogMetrics,
    pub errors: Vec<SectionError>,
}

impl Snapshot {
    /// Whether `section` failed and holds default values.
    pub fn is_degraded(&self, section: Section) -> bool {
        self.errors.iter().any(|e| e.section == section)
    }
}
