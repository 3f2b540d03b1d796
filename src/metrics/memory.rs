//! Memory metrics collection from /proc/meminfo.

use super::clamp_percent;
use crate::access::{FileSystem, PseudoFs};
use crate::error::CollectError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Swap usage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwapMetrics {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub used_percent: f64,
}

/// Memory metrics. All sizes are in bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Total system RAM
    pub total: u64,
    pub free: u64,
    /// Estimate of memory available for new workloads without swapping
    pub available: u64,
    /// Used memory (excluding buffers/cache)
    pub used: u64,
    pub used_percent: f64,
    /// Cached memory (file-backed page cache)
    pub cached: u64,
    pub buffers: u64,
    /// Shared memory (`Shmem`)
    pub shared: u64,
    /// Dirty pages (modified but not yet written to disk)
    pub dirty: u64,
    /// Pages being written back to disk
    pub writeback: u64,
    pub swap: SwapMetrics,
    /// Every numeric meminfo entry, keyed by its meminfo name
    pub details: BTreeMap<String, u64>,
}

/// Reads memory usage. Holds no state between samples.
pub struct MemoryCollector<F: FileSystem> {
    fs: PseudoFs<F>,
}

impl<F: FileSystem> MemoryCollector<F> {
    pub fn new(fs: PseudoFs<F>) -> Self {
        Self { fs }
    }

    /// Collect current memory metrics
    pub fn collect(&self) -> Result<MemoryMetrics, CollectError> {
        let meminfo = self.fs.read_key_value(&self.fs.proc_path("meminfo"))?;

        let mut metrics = MemoryMetrics::default();

        for (key, value) in meminfo {
            // "16384 kB"; HugePages_* counts carry no unit
            let Some(kb) = value
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };
            let bytes = kb.saturating_mul(1024);

            match key.as_str() {
                "MemTotal" => metrics.total = bytes,
                "MemFree" => metrics.free = bytes,
                "MemAvailable" => metrics.available = bytes,
                "Cached" => metrics.cached = bytes,
                "Buffers" => metrics.buffers = bytes,
                "Shmem" => metrics.shared = bytes,
                "Dirty" => metrics.dirty = bytes,
                "Writeback" => metrics.writeback = bytes,
                "SwapTotal" => metrics.swap.total = bytes,
                "SwapFree" => metrics.swap.free = bytes,
                _ => {}
            }
            metrics.details.insert(key, bytes);
        }

        metrics.used = if metrics.available > 0 {
            metrics.total.saturating_sub(metrics.available)
        } else {
            metrics
                .total
                .saturating_sub(metrics.free)
                .saturating_sub(metrics.cached)
                .saturating_sub(metrics.buffers)
        };
        metrics.used_percent = percent_of(metrics.used, metrics.total);

        metrics.swap.used = metrics.swap.total.saturating_sub(metrics.swap.free);
        metrics.swap.used_percent = percent_of(metrics.swap.used, metrics.swap.total);

        Ok(metrics)
    }
}

fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    clamp_percent(100.0 * part as f64 / whole as f64)
}
