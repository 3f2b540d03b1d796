//! Static-ish host identification shown alongside the live metrics.

use super::cpu::{read_load_average, LoadAverage};
use crate::access::{FileSystem, PseudoFs};
use crate::process::boot_time_from_uptime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemOverview {
    pub hostname: String,
    /// Login name from `$USER`
    pub current_user: String,
    pub uptime_secs: f64,
    pub boot_time: Option<DateTime<Utc>>,
    /// Target OS family ("linux")
    pub os: String,
    /// Distribution name from /etc/os-release
    pub platform: Option<String>,
    /// Kernel release
    pub kernel: String,
    pub architecture: String,
    pub cpu_model: String,
    pub cpu_cores: usize,
    /// Total RAM in bytes
    pub total_memory: u64,
    pub load_avg: LoadAverage,
}

/// Reads the overview. Every field is best-effort and defaults when unreadable.
pub struct OverviewProbe<F: FileSystem> {
    fs: PseudoFs<F>,
}

impl<F: FileSystem> OverviewProbe<F> {
    pub fn new(fs: PseudoFs<F>) -> Self {
        Self { fs }
    }

    pub fn collect(&self) -> SystemOverview {
        let uptime_secs = self.uptime_secs();
        let (cpu_model, cpu_cores) = self.cpu_info();

        SystemOverview {
            hostname: self.proc_trimmed("sys/kernel/hostname"),
            current_user: std::env::var("USER").unwrap_or_default(),
            boot_time: uptime_secs.and_then(boot_time_from_uptime),
            uptime_secs: uptime_secs.unwrap_or(0.0),
            os: std::env::consts::OS.to_string(),
            platform: self.platform(),
            kernel: self.proc_trimmed("sys/kernel/osrelease"),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_model,
            cpu_cores,
            total_memory: self.total_memory(),
            load_avg: read_load_average(&self.fs).unwrap_or_default(),
        }
    }

    fn proc_trimmed(&self, rel: &str) -> String {
        self.fs
            .read_trimmed(&self.fs.proc_path(rel))
            .unwrap_or_default()
    }

    fn uptime_secs(&self) -> Option<f64> {
        let line = self.fs.read_first_line(&self.fs.proc_path("uptime")).ok()?;
        line.split_whitespace().next()?.parse().ok()
    }

    /// Model name of the first processor and the processor count.
    fn cpu_info(&self) -> (String, usize) {
        let Ok(lines) = self.fs.read_lines(&self.fs.proc_path("cpuinfo")) else {
            return (String::new(), 0);
        };

        let mut model = None;
        let mut cores = 0;
        for line in &lines {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim() {
                "processor" => cores += 1,
                "model name" if model.is_none() => model = Some(value.trim().to_string()),
                _ => {}
            }
        }
        (model.unwrap_or_default(), cores)
    }

    fn total_memory(&self) -> u64 {
        self.fs
            .read_key_value(&self.fs.proc_path("meminfo"))
            .ok()
            .and_then(|info| {
                let kb: u64 = info.get("MemTotal")?.split_whitespace().next()?.parse().ok()?;
                Some(kb.saturating_mul(1024))
            })
            .unwrap_or(0)
    }

    fn platform(&self) -> Option<String> {
        let content = self.fs.read_raw(Path::new("/etc/os-release")).ok()?;
        content.lines().find_map(|line| {
            let (key, value) = line.split_once('=')?;
            (key.trim() == "PRETTY_NAME").then(|| value.trim().trim_matches('"').to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::MockFs;

    #[test]
    fn reads_every_field() {
        let fs = MockFs::new();
        fs.add_file("/proc/sys/kernel/hostname", "web-01\n");
        fs.add_file("/proc/sys/kernel/osrelease", "6.1.0-18-amd64\n");
        fs.add_file("/proc/uptime", "3600.50 7000.00\n");
        fs.add_file("/proc/loadavg", "1.00 0.50 0.25 2/300 999\n");
        fs.add_file("/proc/meminfo", "MemTotal: 2048 kB\n");
        fs.add_file(
            "/proc/cpuinfo",
            "processor\t: 0\nmodel name\t: Intel(R) Xeon(R) CPU @ 2.20GHz\n\nprocessor\t: 1\nmodel name\t: Intel(R) Xeon(R) CPU @ 2.20GHz\n",
        );
        fs.add_file(
            "/etc/os-release",
            "NAME=\"Debian GNU/Linux\"\nPRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\n",
        );

        let overview = OverviewProbe::new(PseudoFs::new(fs)).collect();
        assert_eq!(overview.hostname, "web-01");
        assert_eq!(overview.kernel, "6.1.0-18-amd64");
        assert_eq!(overview.uptime_secs, 3600.5);
        assert_eq!(overview.cpu_model, "Intel(R) Xeon(R) CPU @ 2.20GHz");
        assert_eq!(overview.cpu_cores, 2);
        assert_eq!(overview.total_memory, 2048 * 1024);
        assert_eq!(overview.load_avg.one, 1.0);
        assert_eq!(
            overview.platform.as_deref(),
            Some("Debian GNU/Linux 12 (bookworm)")
        );
        assert_eq!(overview.architecture, std::env::consts::ARCH);
        let boot_age = (Utc::now() - overview.boot_time.unwrap()).num_seconds();
        assert!((3595..=3605).contains(&boot_age));
    }

    #[test]
    fn missing_files_default() {
        let overview = OverviewProbe::new(PseudoFs::new(MockFs::new())).collect();
        assert_eq!(overview.hostname, "");
        assert_eq!(overview.cpu_cores, 0);
        assert_eq!(overview.uptime_secs, 0.0);
        assert!(overview.boot_time.is_none());
        assert!(overview.platform.is_none());
        assert_eq!(overview.os, "linux");
    }

    #[test]
    fn corrupt_uptime_has_no_boot_time() {
        let fs = MockFs::new();
        fs.add_file("/proc/uptime", "inf 0\n");
        let overview = OverviewProbe::new(PseudoFs::new(fs)).collect();
        assert!(overview.boot_time.is_none());
    }
}
