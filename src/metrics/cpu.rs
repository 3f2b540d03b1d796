//! CPU metrics collection from /proc/stat and /proc/loadavg.

use super::clamp_percent;
use crate::access::{FileSystem, PseudoFs};
use crate::error::CollectError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Raw CPU time values from /proc/stat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

impl CpuTimes {
    /// Sum of the first eight counters. Guest time is already folded into
    /// user/nice by the kernel.
    pub fn total(&self) -> u64 {
        self.user
            .saturating_add(self.nice)
            .saturating_add(self.system)
            .saturating_add(self.idle)
            .saturating_add(self.iowait)
            .saturating_add(self.irq)
            .saturating_add(self.softirq)
            .saturating_add(self.steal)
    }

    pub fn idle_total(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }
}

/// Key into the per-line previous sample table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuKey {
    /// The `cpu ` line summing all cores.
    Aggregate,
    Core(usize),
}

/// Load averages over 1, 5 and 15 minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Per-core CPU utilization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreUtilization {
    pub core_id: usize,
    pub utilization_percent: f64,
    pub user_percent: f64,
    pub system_percent: f64,
    pub iowait_percent: f64,
    /// Current scaling frequency in Hz, when cpufreq is exposed.
    pub frequency_hz: Option<u64>,
}

/// Aggregated CPU metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuMetrics {
    /// Overall CPU utilization percentage
    pub total_utilization: f64,
    /// User space CPU time percentage
    pub user_percent: f64,
    /// Kernel space CPU time percentage
    pub system_percent: f64,
    /// I/O wait percentage
    pub iowait_percent: f64,
    pub per_core: Vec<CoreUtilization>,
    pub load_avg: LoadAverage,
    /// Cumulative context switches since boot
    pub context_switches: u64,
    /// Context switches since the previous sample
    pub context_switches_delta: Option<u64>,
    /// Cumulative interrupts since boot
    pub interrupts: u64,
    pub interrupts_delta: Option<u64>,
    pub core_count: usize,
    /// Temperature of the first thermal zone, in degrees Celsius
    pub temperature_celsius: Option<f64>,
}

/// CPU metrics collector with state for delta calculations
pub struct CpuCollector<F: FileSystem> {
    fs: PseudoFs<F>,
    prev_times: HashMap<CpuKey, CpuTimes>,
    prev_context_switches: Option<u64>,
    prev_interrupts: Option<u64>,
}

impl<F: FileSystem> CpuCollector<F> {
    pub fn new(fs: PseudoFs<F>) -> Self {
        Self {
            fs,
            prev_times: HashMap::new(),
            prev_context_switches: None,
            prev_interrupts: None,
        }
    }

    /// Collect current CPU metrics
    pub fn collect(&mut self) -> Result<CpuMetrics, CollectError> {
        let lines = self.fs.read_lines(&self.fs.proc_path("stat"))?;

        let mut times: HashMap<CpuKey, CpuTimes> = HashMap::new();
        let mut context_switches: u64 = 0;
        let mut interrupts: u64 = 0;

        for line in &lines {
            if line.starts_with("cpu") {
                match parse_cpu_line(line) {
                    Some((key, sample)) => {
                        times.insert(key, sample);
                    }
                    None => debug!(line = %line, "skipping malformed cpu line"),
                }
            } else if let Some(rest) = line.strip_prefix("ctxt ") {
                context_switches = rest.trim().parse().unwrap_or(0);
            } else if let Some(rest) = line.strip_prefix("intr ") {
                interrupts = rest
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
            }
        }

        let total_times = *times
            .get(&CpuKey::Aggregate)
            .ok_or_else(|| CollectError::malformed("stat", "no aggregate cpu line"))?;

        let load_avg = read_load_average(&self.fs)?;

        let total = match self.prev_times.get(&CpuKey::Aggregate) {
            Some(prev) => calculate_utilization(prev, &total_times),
            None => Utilization::default(),
        };

        let mut per_core = Vec::new();
        for (key, sample) in &times {
            let CpuKey::Core(core_id) = *key else {
                continue;
            };
            let util = match self.prev_times.get(key) {
                Some(prev) => calculate_utilization(prev, sample),
                None => Utilization::default(),
            };
            per_core.push(CoreUtilization {
                core_id,
                utilization_percent: util.usage,
                user_percent: util.user,
                system_percent: util.system,
                iowait_percent: util.iowait,
                frequency_hz: self.read_frequency(core_id),
            });
        }
        per_core.sort_by_key(|c| c.core_id);

        let ctx_delta = self
            .prev_context_switches
            .map(|prev| context_switches.saturating_sub(prev));
        let intr_delta = self
            .prev_interrupts
            .map(|prev| interrupts.saturating_sub(prev));

        // Vanished cores drop out with the wholesale replacement
        self.prev_times = times;
        self.prev_context_switches = Some(context_switches);
        self.prev_interrupts = Some(interrupts);

        Ok(CpuMetrics {
            total_utilization: total.usage,
            user_percent: total.user,
            system_percent: total.system,
            iowait_percent: total.iowait,
            core_count: per_core.len(),
            per_core,
            load_avg,
            context_switches,
            context_switches_delta: ctx_delta,
            interrupts,
            interrupts_delta: intr_delta,
            temperature_celsius: self.read_temperature(),
        })
    }

    fn read_frequency(&self, core_id: usize) -> Option<u64> {
        let path = self.fs.sys_path(format!(
            "devices/system/cpu/cpu{}/cpufreq/scaling_cur_freq",
            core_id
        ));
        let khz: u64 = self.fs.read_trimmed(&path).ok()?.parse().ok()?;
        khz.checked_mul(1000)
    }

    fn read_temperature(&self) -> Option<f64> {
        let thermal = self.fs.sys_path("class/thermal");
        let mut zones: Vec<String> = self
            .fs
            .list_dir(&thermal)
            .ok()?
            .into_iter()
            .filter(|name| name.starts_with("thermal_zone"))
            .collect();
        zones.sort();

        zones.iter().find_map(|zone| {
            let raw = self.fs.read_trimmed(&thermal.join(zone).join("temp")).ok()?;
            let millidegrees: i64 = raw.parse().ok()?;
            Some(millidegrees as f64 / 1000.0)
        })
    }
}

/// Parses one `cpu`/`cpuN` line. Returns `None` for lines with fewer than four
/// counters or any non-numeric counter.
pub fn parse_cpu_line(line: &str) -> Option<(CpuKey, CpuTimes)> {
    let mut fields = line.split_whitespace();
    let label = fields.next()?;
    let key = if label == "cpu" {
        CpuKey::Aggregate
    } else {
        CpuKey::Core(label.strip_prefix("cpu")?.parse().ok()?)
    };

    let parts: Vec<u64> = fields
        .map(|s| s.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if parts.len() < 4 {
        return None;
    }
    let at = |i: usize| parts.get(i).copied().unwrap_or(0);

    Some((
        key,
        CpuTimes {
            user: at(0),
            nice: at(1),
            system: at(2),
            idle: at(3),
            iowait: at(4),
            irq: at(5),
            softirq: at(6),
            steal: at(7),
            guest: at(8),
            guest_nice: at(9),
        },
    ))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Utilization {
    pub usage: f64,
    pub user: f64,
    pub system: f64,
    pub iowait: f64,
}

pub fn calculate_utilization(prev: &CpuTimes, curr: &CpuTimes) -> Utilization {
    let total_delta = curr.total().saturating_sub(prev.total());
    if total_delta == 0 {
        return Utilization::default();
    }

    let idle_delta = curr.idle_total().saturating_sub(prev.idle_total());
    let busy_delta = total_delta.saturating_sub(idle_delta);
    let user_delta = curr.user.saturating_sub(prev.user);
    let system_delta = curr.system.saturating_sub(prev.system);
    let iowait_delta = curr.iowait.saturating_sub(prev.iowait);

    let share = |delta: u64| clamp_percent(100.0 * delta as f64 / total_delta as f64);

    Utilization {
        usage: share(busy_delta),
        user: share(user_delta),
        system: share(system_delta),
        iowait: share(iowait_delta),
    }
}

/// Reads the three load averages from the first line of `loadavg`.
pub fn read_load_average<F: FileSystem>(fs: &PseudoFs<F>) -> Result<LoadAverage, CollectError> {
    let line = fs.read_first_line(&fs.proc_path("loadavg"))?;

    let parts: Vec<f64> = line
        .split_whitespace()
        .take(3)
        .map(|s| s.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| CollectError::malformed("loadavg", e.to_string()))?;

    match parts.as_slice() {
        [one, five, fifteen] => Ok(LoadAverage {
            one: *one,
            five: *five,
            fifteen: *fifteen,
        }),
        _ => Err(CollectError::malformed("loadavg", "expected 3 values")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::MockFs;
    use std::sync::Arc;

    const LOADAVG: &str = "0.52 0.58 0.59 1/389 12345\n";

    fn stat(aggregate: &str, cores: &[&str]) -> String {
        let mut s = format!("cpu  {}\n", aggregate);
        for (i, c) in cores.iter().enumerate() {
            s.push_str(&format!("cpu{} {}\n", i, c));
        }
        s.push_str("intr 1000 0 0\nctxt 5000\nbtime 1700000000\n");
        s
    }

    fn collector(mock: &Arc<MockFs>) -> CpuCollector<Arc<MockFs>> {
        CpuCollector::new(PseudoFs::new(Arc::clone(mock)))
    }

    #[test]
    fn first_sample_reports_zero_usage() {
        let mock = Arc::new(MockFs::new());
        mock.add_file("/proc/stat", stat("100 0 50 800 50 0 0 0 0 0", &["50 0 25 400 25"]));
        mock.add_file("/proc/loadavg", LOADAVG);

        let metrics = collector(&mock).collect().unwrap();
        assert_eq!(metrics.total_utilization, 0.0);
        assert_eq!(metrics.core_count, 1);
        assert_eq!(metrics.per_core[0].utilization_percent, 0.0);
        assert_eq!(metrics.context_switches_delta, None);
        assert_eq!(
            metrics.load_avg,
            LoadAverage {
                one: 0.52,
                five: 0.58,
                fifteen: 0.59
            }
        );
    }

    #[test]
    fn usage_from_counter_deltas() {
        let mock = Arc::new(MockFs::new());
        mock.add_file("/proc/stat", stat("1000 100 500 8000 400 0 0 0 0 0", &[]));
        mock.add_file("/proc/loadavg", LOADAVG);
        let mut collector = collector(&mock);
        collector.collect().unwrap();

        mock.add_file("/proc/stat", stat("1100 100 600 8200 500 0 0 0 0 0", &[]));
        let metrics = collector.collect().unwrap();

        assert!((metrics.total_utilization - 40.0).abs() < 1e-9);
        assert!((metrics.user_percent - 20.0).abs() < 1e-9);
        assert!((metrics.system_percent - 20.0).abs() < 1e-9);
        assert!((metrics.iowait_percent - 20.0).abs() < 1e-9);
    }

    #[test]
    fn unchanged_counters_yield_zero() {
        let mock = Arc::new(MockFs::new());
        mock.add_file("/proc/stat", stat("1000 100 500 8000 400", &["500 50 250 4000 200"]));
        mock.add_file("/proc/loadavg", LOADAVG);
        let mut collector = collector(&mock);
        collector.collect().unwrap();
        let metrics = collector.collect().unwrap();

        assert_eq!(metrics.total_utilization, 0.0);
        assert_eq!(metrics.per_core[0].utilization_percent, 0.0);
        assert_eq!(metrics.context_switches_delta, Some(0));
    }

    #[test]
    fn counter_reset_never_goes_negative() {
        let mock = Arc::new(MockFs::new());
        mock.add_file("/proc/stat", stat("5000 0 5000 5000 0", &[]));
        mock.add_file("/proc/loadavg", LOADAVG);
        let mut collector = collector(&mock);
        collector.collect().unwrap();

        mock.add_file("/proc/stat", stat("10 0 10 900 0", &[]));
        let metrics = collector.collect().unwrap();
        assert!(metrics.total_utilization >= 0.0 && metrics.total_utilization <= 100.0);
    }

    #[test]
    fn malformed_core_line_is_skipped() {
        let mock = Arc::new(MockFs::new());
        mock.add_file(
            "/proc/stat",
            "cpu  10 0 10 80\ncpu0 10 0 10 80\ncpu1 1 2\ncpu2 1 x 3 4\n",
        );
        mock.add_file("/proc/loadavg", LOADAVG);
        let metrics = collector(&mock).collect().unwrap();
        assert_eq!(metrics.core_count, 1);
        assert_eq!(metrics.per_core[0].core_id, 0);
    }

    #[test]
    fn missing_aggregate_or_loadavg_is_fatal() {
        let mock = Arc::new(MockFs::new());
        mock.add_file("/proc/stat", "cpu0 10 0 10 80\n");
        mock.add_file("/proc/loadavg", LOADAVG);
        assert!(matches!(
            collector(&mock).collect(),
            Err(CollectError::Malformed { file: "stat", .. })
        ));

        let mock = Arc::new(MockFs::new());
        mock.add_file("/proc/stat", "cpu  10 0 10 80\n");
        assert!(matches!(
            collector(&mock).collect(),
            Err(CollectError::Access(_))
        ));
    }

    #[test]
    fn optional_frequency_and_temperature() {
        let mock = Arc::new(MockFs::new());
        mock.add_file("/proc/stat", stat("10 0 10 80", &["5 0 5 40", "5 0 5 40"]));
        mock.add_file("/proc/loadavg", LOADAVG);
        mock.add_file(
            "/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq",
            "2400000\n",
        );
        mock.add_dir("/sys/class/thermal/cooling_device0");
        mock.add_dir("/sys/class/thermal/thermal_zone0");
        mock.add_file("/sys/class/thermal/thermal_zone1/temp", "45500\n");

        let metrics = collector(&mock).collect().unwrap();
        assert_eq!(metrics.per_core[0].frequency_hz, Some(2_400_000_000));
        assert_eq!(metrics.per_core[1].frequency_hz, None);
        assert_eq!(metrics.temperature_celsius, Some(45.5));
    }

    #[test]
    fn oversized_frequency_is_dropped() {
        let mock = Arc::new(MockFs::new());
        mock.add_file("/proc/stat", stat("10 0 10 80", &["5 0 5 40"]));
        mock.add_file("/proc/loadavg", LOADAVG);
        mock.add_file(
            "/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq",
            format!("{}\n", u64::MAX / 10),
        );

        let metrics = collector(&mock).collect().unwrap();
        assert_eq!(metrics.per_core[0].frequency_hz, None);
    }

    #[test]
    fn parse_cpu_line_short_counters() {
        let (key, times) = parse_cpu_line("cpu3 1 2 3 4").unwrap();
        assert_eq!(key, CpuKey::Core(3));
        assert_eq!(times.idle, 4);
        assert_eq!(times.steal, 0);
        assert!(parse_cpu_line("cpu 1 2 3").is_none());
    }
}
