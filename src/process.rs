//! Per-process metrics collection from /proc/[pid]/ files.

use crate::access::{parse_key_value, FileSystem, PseudoFs};
use crate::error::CollectError;
use crate::metrics::clamp_percent;
use crate::metrics::cpu::parse_cpu_line;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Minimum number of whitespace-separated stat fields, counting pid and comm.
const MIN_STAT_FIELDS: usize = 52;

/// OS constants needed to convert process counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemConstants {
    /// Scheduler clock ticks per second (`_SC_CLK_TCK`)
    pub clock_ticks: u64,
    /// Memory page size in bytes (`_SC_PAGESIZE`)
    pub page_size: u64,
}

impl SystemConstants {
    /// Queries `sysconf`, falling back to 100 Hz and 4 KiB pages.
    pub fn from_sysconf() -> Self {
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        Self {
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { 100 },
            page_size: if page_size > 0 { page_size as u64 } else { 4096 },
        }
    }
}

impl Default for SystemConstants {
    fn default() -> Self {
        Self {
            clock_ticks: 100,
            page_size: 4096,
        }
    }
}

/// Process state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ProcessState {
    Running,
    Sleeping,
    /// Idle kernel thread
    Idle,
    DiskSleep, // Uninterruptible sleep (waiting for I/O)
    Stopped,
    Zombie,
    Dead,
    #[default]
    Unknown,
}

impl ProcessState {
    pub fn from_code(code: char) -> Self {
        match code {
            'R' => ProcessState::Running,
            'S' => ProcessState::Sleeping,
            'I' => ProcessState::Idle,
            'D' => ProcessState::DiskSleep,
            'T' | 't' => ProcessState::Stopped,
            'Z' => ProcessState::Zombie,
            'X' | 'x' => ProcessState::Dead,
            _ => ProcessState::Unknown,
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Running => write!(f, "Running"),
            ProcessState::Sleeping => write!(f, "Sleeping"),
            ProcessState::Idle => write!(f, "Idle"),
            ProcessState::DiskSleep => write!(f, "Disk Sleep"),
            ProcessState::Stopped => write!(f, "Stopped"),
            ProcessState::Zombie => write!(f, "Zombie"),
            ProcessState::Dead => write!(f, "Dead"),
            ProcessState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// One process as seen in a single sample
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Process {
    pub pid: u32,
    pub ppid: u32,
    /// Short name from stat (`comm`)
    pub name: String,
    /// Full command line, or the name when the command line is empty
    pub command: String,
    pub state: ProcessState,
    pub priority: i64,
    pub nice: i64,
    pub num_threads: u64,
    /// Size of the file descriptor table (`FDSize`)
    pub num_fds: Option<u64>,
    /// Resident Set Size (physical memory) in bytes
    pub rss_bytes: u64,
    /// Virtual memory size in bytes
    pub vsize_bytes: u64,
    /// RSS as a share of total system memory
    pub memory_percent: f64,
    /// Cumulative utime + stime, in clock ticks
    pub cpu_ticks: u64,
    /// Cumulative CPU time in seconds
    pub cpu_time_secs: f64,
    pub cpu_percent: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub user: Option<String>,
    pub group: Option<String>,
}

/// Process table plus state counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessMetrics {
    /// Sorted by CPU usage descending, then PID ascending
    pub processes: Vec<Process>,
    pub total: usize,
    pub running: usize,
    /// `S` and `I` states
    pub sleeping: usize,
    pub disk_sleep: usize,
    /// `T` and `t` states
    pub stopped: usize,
    pub zombie: usize,
}

impl ProcessMetrics {
    /// Fills `memory_percent` from the total system memory in bytes.
    pub fn apply_memory_total(&mut self, total_memory: u64) {
        for process in &mut self.processes {
            process.memory_percent = if total_memory > 0 {
                clamp_percent(100.0 * process.rss_bytes as f64 / total_memory as f64)
            } else {
                0.0
            };
        }
    }
}

/// Fields of /proc/[pid]/stat used by the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub utime: u64,
    pub stime: u64,
    pub priority: i64,
    pub nice: i64,
    pub num_threads: u64,
    /// Ticks since boot at which the process started
    pub starttime: u64,
    pub vsize: u64,
    /// Resident pages
    pub rss: u64,
}

/// Parses /proc/[pid]/stat.
///
/// The comm field can contain spaces and parentheses, so it spans from the
/// first `(` to the last `)`.
pub fn parse_stat(content: &str) -> Option<ProcStat> {
    let comm_start = content.find('(')?;
    let comm_end = content.rfind(')')?;
    if comm_end < comm_start {
        return None;
    }

    let pid = content[..comm_start].trim().parse().ok()?;
    let comm = content[comm_start + 1..comm_end].to_string();
    // Fields after comm are 0-indexed from state
    let fields: Vec<&str> = content[comm_end + 1..].split_whitespace().collect();
    if fields.len() + 2 < MIN_STAT_FIELDS {
        return None;
    }

    let num = |i: usize| fields[i].parse::<u64>().ok();
    let signed = |i: usize| fields[i].parse::<i64>().ok();

    Some(ProcStat {
        pid,
        comm,
        state: fields[0].chars().next()?,
        ppid: fields[1].parse().ok()?,
        utime: num(11)?,
        stime: num(12)?,
        priority: signed(15)?,
        nice: signed(16)?,
        num_threads: num(17)?,
        starttime: num(19)?,
        vsize: num(20)?,
        rss: signed(21)?.max(0) as u64,
    })
}

/// Parses colon-separated passwd/group entries into id → name.
pub fn parse_id_names(content: &str) -> HashMap<u32, String> {
    content
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split(':');
            let name = parts.next()?;
            let id = parts.nth(1)?.parse().ok()?;
            Some((id, name.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct PrevProcess {
    cpu_ticks: u64,
    starttime: u64,
}

/// Wall-clock boot time from seconds since boot. `None` for negative,
/// non-finite or out-of-range values.
pub fn boot_time_from_uptime(uptime_secs: f64) -> Option<DateTime<Utc>> {
    if !uptime_secs.is_finite() || uptime_secs < 0.0 {
        return None;
    }
    let ms = uptime_secs * 1000.0;
    if ms >= i64::MAX as f64 {
        return None;
    }
    let uptime = ChronoDuration::try_milliseconds(ms as i64)?;
    Utc::now().checked_sub_signed(uptime)
}

/// Process metrics collector with state for CPU calculation
pub struct ProcessCollector<F: FileSystem> {
    fs: PseudoFs<F>,
    constants: SystemConstants,
    prev: HashMap<u32, PrevProcess>,
    prev_total_ticks: Option<u64>,
}

impl<F: FileSystem> ProcessCollector<F> {
    pub fn new(fs: PseudoFs<F>, constants: SystemConstants) -> Self {
        Self {
            fs,
            constants,
            prev: HashMap::new(),
            prev_total_ticks: None,
        }
    }

    /// Collect the current process table
    pub fn collect(&mut self) -> Result<ProcessMetrics, CollectError> {
        let total_ticks = self.read_total_ticks()?;
        let entries = self.fs.list_dir(self.fs.proc_root())?;

        let total_delta = self
            .prev_total_ticks
            .map(|prev| total_ticks.saturating_sub(prev))
            .unwrap_or(0);
        let boot_time = self.boot_time();
        let users = self.read_id_names("/etc/passwd");
        let groups = self.read_id_names("/etc/group");

        let mut current: HashMap<u32, PrevProcess> = HashMap::new();
        let mut processes = Vec::new();

        for pid in entries.iter().filter_map(|name| name.parse::<u32>().ok()) {
            let Some(stat) = self.read_stat(pid) else {
                continue;
            };

            let cpu_ticks = stat.utime.saturating_add(stat.stime);
            // A reused PID has a different start time and counts as new
            let cpu_percent = match self.prev.get(&pid) {
                Some(prev) if prev.starttime == stat.starttime && total_delta > 0 => {
                    let delta = cpu_ticks.saturating_sub(prev.cpu_ticks);
                    clamp_percent(100.0 * delta as f64 / total_delta as f64)
                }
                _ => 0.0,
            };

            current.insert(
                pid,
                PrevProcess {
                    cpu_ticks,
                    starttime: stat.starttime,
                },
            );

            let mut process = Process {
                pid,
                ppid: stat.ppid,
                state: ProcessState::from_code(stat.state),
                priority: stat.priority,
                nice: stat.nice,
                num_threads: stat.num_threads,
                rss_bytes: stat.rss.saturating_mul(self.constants.page_size),
                vsize_bytes: stat.vsize,
                cpu_ticks,
                cpu_time_secs: cpu_ticks as f64 / self.constants.clock_ticks as f64,
                cpu_percent,
                start_time: boot_time.and_then(|boot| {
                    let ms = stat.starttime.saturating_mul(1000) / self.constants.clock_ticks;
                    let offset = ChronoDuration::try_milliseconds(i64::try_from(ms).ok()?)?;
                    boot.checked_add_signed(offset)
                }),
                command: self.read_cmdline(pid).unwrap_or_else(|| stat.comm.clone()),
                name: stat.comm,
                ..Default::default()
            };
            self.apply_status(&mut process, &users, &groups);
            processes.push(process);
        }

        processes.sort_by(|a, b| {
            b.cpu_percent
                .total_cmp(&a.cpu_percent)
                .then(a.pid.cmp(&b.pid))
        });

        self.prev = current;
        self.prev_total_ticks = Some(total_ticks);

        Ok(tally(processes))
    }

    fn read_total_ticks(&self) -> Result<u64, CollectError> {
        let first = self.fs.read_first_line(&self.fs.proc_path("stat"))?;
        if !first.starts_with("cpu ") {
            return Err(CollectError::malformed("stat", "no aggregate cpu line"));
        }
        parse_cpu_line(&first)
            .map(|(_, times)| times.total())
            .ok_or_else(|| CollectError::malformed("stat", "unparseable aggregate cpu line"))
    }

    fn read_stat(&self, pid: u32) -> Option<ProcStat> {
        let path = self.fs.proc_path(format!("{}/stat", pid));
        // The process may exit between enumeration and read
        let content = self.fs.read_raw(&path).ok()?;
        let stat = parse_stat(&content);
        if stat.is_none() {
            debug!(pid, "skipping process with malformed stat");
        }
        stat
    }

    fn read_cmdline(&self, pid: u32) -> Option<String> {
        let raw = self
            .fs
            .read_raw(&self.fs.proc_path(format!("{}/cmdline", pid)))
            .ok()?;
        let cmdline = raw.replace('\0', " ").trim().to_string();
        (!cmdline.is_empty()).then_some(cmdline)
    }

    fn apply_status(
        &self,
        process: &mut Process,
        users: &HashMap<u32, String>,
        groups: &HashMap<u32, String>,
    ) {
        let path = self.fs.proc_path(format!("{}/status", process.pid));
        let Ok(content) = self.fs.read_raw(&path) else {
            return;
        };
        let status = parse_key_value(&content);

        let first_id = |key: &str| -> Option<u32> {
            status.get(key)?.split_whitespace().next()?.parse().ok()
        };
        let resolve = |id: u32, names: &HashMap<u32, String>| {
            names.get(&id).cloned().unwrap_or_else(|| id.to_string())
        };

        process.user = first_id("Uid").map(|uid| resolve(uid, users));
        process.group = first_id("Gid").map(|gid| resolve(gid, groups));
        process.num_fds = status.get("FDSize").and_then(|v| v.parse().ok());
    }

    fn boot_time(&self) -> Option<DateTime<Utc>> {
        let uptime = self
            .fs
            .read_first_line(&self.fs.proc_path("uptime"))
            .ok()?;
        let secs: f64 = uptime.split_whitespace().next()?.parse().ok()?;
        boot_time_from_uptime(secs)
    }

    fn read_id_names(&self, path: &str) -> HashMap<u32, String> {
        self.fs
            .read_raw(Path::new(path))
            .map(|content| parse_id_names(&content))
            .unwrap_or_default()
    }
}

fn tally(processes: Vec<Process>) -> ProcessMetrics {
    let count = |states: &[ProcessState]| {
        processes
            .iter()
            .filter(|p| states.contains(&p.state))
            .count()
    };

    ProcessMetrics {
        total: processes.len(),
        running: count(&[ProcessState::Running]),
        sleeping: count(&[ProcessState::Sleeping, ProcessState::Idle]),
        disk_sleep: count(&[ProcessState::DiskSleep]),
        stopped: count(&[ProcessState::Stopped]),
        zombie: count(&[ProcessState::Zombie]),
        processes,
    }
}
